//! Transport envelope types
//!
//! The wire transport itself lives outside this crate; it is an opaque
//! carrier of `NetworkMessage` envelopes. This module defines the envelope
//! and the payload codecs that connect it to the core: CHUNK_RESPONSE
//! payloads decode into chunks consumable by `ChunkStore::store_chunk`,
//! TELEMETRY_UPDATE payloads into snapshots for `Scheduler::update_telemetry`.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::ChunkHash;
use crate::store::{Chunk, ChunkError};
use crate::telemetry::{now_millis, Telemetry};
use crate::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    ChunkRequest,
    ChunkResponse,
    TelemetryUpdate,
    ModelShardRequest,
    InferenceRequest,
    InferenceResult,
    PeerDiscovery,
    Heartbeat,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected message type: {0:?}")]
    UnexpectedType(MessageType),
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Envelope delivered by the peer transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub message_type: MessageType,
    pub sender_id: DeviceId,
    pub recipient_id: DeviceId,
    pub payload: Vec<u8>,
    /// Unix milliseconds at send time
    pub timestamp: u64,
    pub message_id: String,
}

impl NetworkMessage {
    /// New envelope stamped now with a random message id
    pub fn new(
        message_type: MessageType,
        sender_id: impl Into<DeviceId>,
        recipient_id: impl Into<DeviceId>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_type,
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            payload,
            timestamp: now_millis(),
            message_id: generate_message_id(),
        }
    }

    /// CHUNK_RESPONSE carrying a chunk record
    ///
    /// Payload layout: 32-byte chunk hash followed by the packed record.
    pub fn chunk_response(
        sender_id: impl Into<DeviceId>,
        recipient_id: impl Into<DeviceId>,
        chunk: &Chunk,
    ) -> Self {
        let mut payload = chunk.hash.as_bytes().to_vec();
        payload.extend_from_slice(&chunk.encode());
        Self::new(MessageType::ChunkResponse, sender_id, recipient_id, payload)
    }

    /// Parse a CHUNK_RESPONSE payload back into a chunk
    pub fn decode_chunk(&self) -> Result<Chunk, ProtocolError> {
        if self.message_type != MessageType::ChunkResponse {
            return Err(ProtocolError::UnexpectedType(self.message_type));
        }
        if self.payload.len() < 32 {
            return Err(ChunkError::Truncated.into());
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.payload[..32]);
        Ok(Chunk::decode(ChunkHash::from_bytes(hash), &self.payload[32..])?)
    }

    /// TELEMETRY_UPDATE carrying a device snapshot
    pub fn telemetry_update(
        sender_id: impl Into<DeviceId>,
        recipient_id: impl Into<DeviceId>,
        telemetry: &Telemetry,
    ) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_vec(telemetry)?;
        Ok(Self::new(
            MessageType::TelemetryUpdate,
            sender_id,
            recipient_id,
            payload,
        ))
    }

    /// Parse a TELEMETRY_UPDATE payload back into a snapshot
    pub fn decode_telemetry(&self) -> Result<Telemetry, ProtocolError> {
        if self.message_type != MessageType::TelemetryUpdate {
            return Err(ProtocolError::UnexpectedType(self.message_type));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Serialize the envelope for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse an envelope off the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn generate_message_id() -> String {
    let mut id = [0u8; 16];
    OsRng.fill_bytes(&mut id);
    hex::encode(id)
}

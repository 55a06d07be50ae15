//! meshplane - storage and placement substrate for a decentralized mesh
//!
//! The core of a peer-to-peer data plane where:
//! - Payloads are split into fixed-size chunks, compressed, optionally
//!   AES-256-GCM encrypted, and addressed by the SHA-256 of their stored bytes
//! - A telemetry-driven scheduler picks replica sets across heterogeneous
//!   devices with a configurable replication factor
//! - A CRDT DAG ledger records where chunks live and merges gossip
//!   idempotently with last-write-wins conflict resolution
//! - A weighted device graph answers shortest-path route queries and resolves
//!   chunk locations
//!
//! The caller orchestrates the flow: `store` a payload, `place_chunks` on the
//! scheduler, `add_entry` in the ledger, `register_chunk_location` with the
//! router. Each step is idempotent under retry, so a partially failed
//! orchestration recovers by rerunning it with the same inputs.

pub mod consensus;
pub mod crypto;
pub mod network;
pub mod routing;
pub mod scheduler;
pub mod store;
pub mod telemetry;

/// Identifier of a device participating in the mesh
pub type DeviceId = String;

// Re-export commonly used types
pub use consensus::{resolve_conflict, DagEntry, DagLedger, EntryId};
pub use crypto::{ChunkHash, ContentKey};
pub use network::{MessageType, NetworkMessage, ProtocolError};
pub use routing::{Link, Route, Router};
pub use scheduler::{ModelShard, Placement, Scheduler, DEFAULT_REPLICATION_FACTOR};
pub use store::{Chunk, ChunkStore, StoreConfig, StoreError, DEFAULT_CHUNK_SIZE};
pub use telemetry::{ScoreWeights, Telemetry};

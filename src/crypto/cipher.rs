//! Authenticated encryption using AES-256-GCM
//!
//! The IV and authentication tag are kept detached from the ciphertext
//! because the persisted chunk record stores all three as separate fields.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use super::keys::ContentKey;

/// GCM IV length in bytes
pub const IV_LEN: usize = 12;

/// GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Authentication failed - data may be corrupted or key incorrect")]
    AuthenticationFailed,
    #[error("Invalid IV length: {0} (expected {IV_LEN})")]
    InvalidIv(usize),
    #[error("Invalid tag length: {0} (expected {TAG_LEN})")]
    InvalidTag(usize),
}

/// Encrypt data with AES-256-GCM under a fresh random 12-byte IV
///
/// Returns `(ciphertext, iv, tag)`. The ciphertext has the same length
/// as the plaintext; the 16-byte tag authenticates both.
pub fn encrypt(
    key: &ContentKey,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; IV_LEN], [u8; TAG_LEN]), CipherError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, &[], &mut buffer)
        .map_err(|_| CipherError::EncryptionFailed)?;

    Ok((buffer, iv, tag.into()))
}

/// Decrypt data with AES-256-GCM, verifying the detached tag
pub fn decrypt(
    key: &ContentKey,
    ciphertext: &[u8],
    iv: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, CipherError> {
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidIv(iv.len()));
    }
    if tag.len() != TAG_LEN {
        return Err(CipherError::InvalidTag(tag.len()));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(iv);
    let tag = Tag::from_slice(tag);

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce, &[], &mut buffer, tag)
        .map_err(|_| CipherError::AuthenticationFailed)?;

    Ok(buffer)
}

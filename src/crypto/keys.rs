//! Content key derivation using PBKDF2-HMAC-SHA256
//!
//! Each stored content gets a 256-bit key derived from its content
//! identifier and a random salt. The salt is persisted alongside the
//! content mapping so the same key can be rebuilt on retrieval.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

/// PBKDF2 iteration count
pub const KDF_ITERATIONS: u32 = 100_000;

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Per-content encryption key
/// Automatically zeroed when dropped
#[derive(ZeroizeOnDrop)]
pub struct ContentKey {
    key: [u8; 32],
}

impl ContentKey {
    /// Derive a content key from a content identifier and salt
    ///
    /// PBKDF2-HMAC-SHA256 with 100 000 iterations and a 32-byte output.
    pub fn derive(content_id: &str, salt: &[u8; SALT_LEN]) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(content_id.as_bytes(), salt, KDF_ITERATIONS, &mut key);
        Self { key }
    }

    /// Generate a new random salt for key derivation
    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    /// Get raw key bytes (use carefully)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

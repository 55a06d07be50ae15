//! Cryptography module for the chunk store
//!
//! Provides content addressing, key derivation, and authenticated encryption.

pub mod cipher;
pub mod hashing;
pub mod keys;

pub use cipher::{decrypt, encrypt, CipherError, IV_LEN, TAG_LEN};
pub use hashing::{sha256, verify_chunk, ChunkHash};
pub use keys::{ContentKey, KDF_ITERATIONS, SALT_LEN};

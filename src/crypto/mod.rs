//! Crypto primitives used by the sealed container capability.
//!
//! AES-256-GCM for packets and wrapped keys, HKDF-SHA256 for passphrase
//! key-encryption keys.

pub mod aes;
pub mod hkdf;
pub mod utils;

pub use aes::unseal_aes_gcm;
pub use hkdf::derive_key_encryption_key;

//! Utility functions for cryptographic operations.
//!
//! The random generators only back the test encoders; this crate never
//! writes containers.

#[cfg(test)]
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serializer};

#[cfg(test)]
use super::aes::AES_IV_SIZE;
use super::aes::AES_KEY_SIZE;

/// Generate cryptographically secure random bytes.
#[cfg(test)]
pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Generate a random 32-byte AES key.
#[cfg(test)]
pub fn generate_file_key() -> [u8; AES_KEY_SIZE] {
    let mut key = [0u8; AES_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Generate a random 12-byte IV.
#[cfg(test)]
pub fn generate_iv() -> [u8; AES_IV_SIZE] {
    let mut iv = [0u8; AES_IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Interpret a byte slice as a 32-byte AES key.
pub fn as_aes_key(bytes: &[u8]) -> Option<&[u8; AES_KEY_SIZE]> {
    bytes.try_into().ok()
}

/// Serde adapter for byte fields carried as hex strings.
pub mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional byte fields carried as hex strings.
pub mod hex_bytes_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => hex::decode(s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

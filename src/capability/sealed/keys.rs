//! Repository key slots and passphrase unlock.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::capability::{CapabilityError, KeyMaterial, UnlockedKey};
use crate::crypto::aes::AES_KEY_SIZE;
use crate::crypto::utils::hex_bytes;
use crate::crypto::{derive_key_encryption_key, unseal_aes_gcm};

/// Name of the repository info object.
pub const INFO_OBJECT: &str = "_info.json";

pub const SUPPORTED_INFO_VERSION: u16 = 1;

/// Contents of `_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub version: u16,
    #[serde(default)]
    pub keys: Vec<KeySlot>,
}

/// Master key wrapped with one passphrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySlot {
    pub key_id: String,
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub wrapped_key: Vec<u8>,
}

/// Try every key slot with `passphrase`.
pub fn unlock_with_passphrase(
    info: &RepoInfo,
    passphrase: &str,
) -> Result<UnlockedKey, CapabilityError> {
    if info.version != SUPPORTED_INFO_VERSION {
        return Err(CapabilityError::Corrupted(format!(
            "unsupported repository version {}",
            info.version
        )));
    }

    for slot in &info.keys {
        let kek = match derive_key_encryption_key(passphrase, &slot.salt) {
            Ok(kek) => kek,
            Err(e) => {
                log::warn!("Skipping key slot {}: {}", slot.key_id, e);
                continue;
            }
        };
        // A wrong passphrase fails authentication; move to the next slot.
        let Ok(master) = unseal_aes_gcm(&slot.wrapped_key, &kek) else {
            continue;
        };
        let master = Zeroizing::new(master);
        if master.len() != AES_KEY_SIZE {
            log::warn!("Key slot {} holds a key of invalid length", slot.key_id);
            continue;
        }
        return Ok(UnlockedKey {
            key: KeyMaterial::new(master.to_vec()),
            key_id: slot.key_id.clone(),
        });
    }

    Err(CapabilityError::InvalidPassphrase)
}

#[cfg(test)]
pub fn new_key_slot(key_id: &str, passphrase: &str, master: &[u8; AES_KEY_SIZE]) -> KeySlot {
    use crate::crypto::aes::seal_aes_gcm;
    use crate::crypto::utils::generate_random_bytes;

    let salt = generate_random_bytes(16);
    let kek = derive_key_encryption_key(passphrase, &salt).unwrap();
    KeySlot {
        key_id: key_id.to_string(),
        salt,
        wrapped_key: seal_aes_gcm(master, &kek).unwrap(),
    }
}

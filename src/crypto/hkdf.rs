//! HKDF-SHA256 key-encryption-key derivation.
//!
//! Derivation path:
//!   passphrase (UTF-8)
//!     -> HKDF-SHA256(salt=<per-key salt>, info="vaultgate-kek-v1")
//!     -> 32-byte key-encryption key
//!     -> unseals the wrapped master key

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::aes::AES_KEY_SIZE;

/// HKDF info for passphrase-derived key-encryption keys.
const KEK_HKDF_INFO: &[u8] = b"vaultgate-kek-v1";

/// Minimum salt length accepted from the repository info object.
pub const MIN_SALT_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("Salt must be at least {MIN_SALT_LENGTH} bytes")]
    InvalidSalt,
    #[error("HKDF derivation failed")]
    DerivationFailed,
}

/// Derive the key-encryption key for one repository key slot.
pub fn derive_key_encryption_key(
    passphrase: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; AES_KEY_SIZE]>, HkdfError> {
    if salt.len() < MIN_SALT_LENGTH {
        return Err(HkdfError::InvalidSalt);
    }

    let hk = Hkdf::<Sha256>::new(Some(salt), passphrase.as_bytes());
    let mut okm = Zeroizing::new([0u8; AES_KEY_SIZE]);
    hk.expand(KEK_HKDF_INFO, &mut okm[..])
        .map_err(|_| HkdfError::DerivationFailed)?;
    Ok(okm)
}

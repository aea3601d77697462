//! AES-256-GCM encryption/decryption.
//!
//! Sealed format: IV (12 bytes) || Ciphertext || Auth Tag (16 bytes)
//! Used for wrapped keys. Container packets use the detached-nonce variants
//! with associated data.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

/// AES-256-GCM key size in bytes (256 bits).
pub const AES_KEY_SIZE: usize = 32;

/// AES-GCM IV size in bytes (96 bits).
pub const AES_IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits).
pub const AES_TAG_SIZE: usize = 16;

/// Minimum sealed data size: IV + auth tag (empty plaintext).
const MIN_SEALED_SIZE: usize = AES_IV_SIZE + AES_TAG_SIZE;

#[derive(Debug, Error)]
pub enum AesError {
    #[cfg(test)]
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Encrypt data using AES-256-GCM, authenticating `aad` alongside it.
///
/// Returns ciphertext with the 16-byte auth tag appended.
#[cfg(test)]
pub fn encrypt_aes_gcm(
    plaintext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_IV_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>, AesError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AesError::EncryptionFailed)?;
    let nonce = Nonce::from_slice(iv);

    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| AesError::EncryptionFailed)
}

/// Decrypt data using AES-256-GCM.
///
/// Expects ciphertext with 16-byte auth tag appended. Fails if either the
/// ciphertext or `aad` was tampered with.
pub fn decrypt_aes_gcm(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_IV_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>, AesError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AesError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| AesError::DecryptionFailed)
}

/// Seal data using AES-256-GCM with automatic IV generation.
///
/// Returns: IV (12 bytes) || Ciphertext || Auth Tag (16 bytes)
#[cfg(test)]
pub fn seal_aes_gcm(plaintext: &[u8], key: &[u8; AES_KEY_SIZE]) -> Result<Vec<u8>, AesError> {
    let iv = super::utils::generate_iv();
    let ciphertext = encrypt_aes_gcm(plaintext, key, &iv, &[])?;

    let mut sealed = Vec::with_capacity(AES_IV_SIZE + ciphertext.len());
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Unseal data encrypted with `seal_aes_gcm`.
///
/// Extracts IV from first 12 bytes, decrypts remainder.
pub fn unseal_aes_gcm(sealed: &[u8], key: &[u8; AES_KEY_SIZE]) -> Result<Vec<u8>, AesError> {
    if sealed.len() < MIN_SEALED_SIZE {
        return Err(AesError::DecryptionFailed);
    }

    let iv: [u8; AES_IV_SIZE] = sealed[..AES_IV_SIZE]
        .try_into()
        .map_err(|_| AesError::DecryptionFailed)?;
    let ciphertext = &sealed[AES_IV_SIZE..];

    decrypt_aes_gcm(ciphertext, key, &iv, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let key = [7u8; 32];
        let sealed = seal_aes_gcm(b"file key", &key).unwrap();
        assert_eq!(sealed.len(), AES_IV_SIZE + 8 + AES_TAG_SIZE);
        assert_eq!(unseal_aes_gcm(&sealed, &key).unwrap(), b"file key");
    }

    #[test]
    fn test_unseal_wrong_key_fails() {
        let sealed = seal_aes_gcm(b"file key", &[7u8; 32]).unwrap();
        assert!(unseal_aes_gcm(&sealed, &[8u8; 32]).is_err());
    }

    #[test]
    fn test_unseal_too_short() {
        assert!(unseal_aes_gcm(&[0u8; MIN_SEALED_SIZE - 1], &[7u8; 32]).is_err());
    }

    #[test]
    fn test_tampered_aad_fails() {
        let key = [1u8; 32];
        let iv = [2u8; 12];
        let ct = encrypt_aes_gcm(b"packet", &key, &iv, b"hdr").unwrap();
        assert_eq!(decrypt_aes_gcm(&ct, &key, &iv, b"hdr").unwrap(), b"packet");
        assert!(decrypt_aes_gcm(&ct, &key, &iv, b"HDR").is_err());
    }
}

//! Sealed container format.
//!
//! Layout of a stored object:
//!
//! ```text
//! [u16 LE header length][header JSON {"v": version, "k": hex(wrapped file key)}]
//! [packet 0][packet 1]...
//! ```
//!
//! Each packet is a 16-byte header followed by AES-256-GCM ciphertext and tag:
//!
//! ```text
//! [0x20][cipher id][u16 LE payload length - 1][u32 LE sequence][8 random bytes]
//! ```
//!
//! The nonce is header bytes 4..16 and the first four header bytes are
//! authenticated as associated data. Packets hold at most 64 KiB of
//! plaintext, so a stored packet is at most 64 KiB + 32 bytes.
//!
//! The concatenated plaintext starts with `[u16 LE metadata length][metadata JSON]`
//! followed by the file contents.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::capability::{CapabilityError, KeyMaterial};
use crate::crypto::aes::{decrypt_aes_gcm, AES_IV_SIZE, AES_KEY_SIZE, AES_TAG_SIZE};
use crate::crypto::utils::{as_aes_key, hex_bytes};
use crate::crypto::unseal_aes_gcm;
use crate::range::STORED_PACKET_SIZE;

/// Bytes to read from the start of an object to be sure the header is covered.
pub const MAX_HEADER_SIZE: usize = 256;

/// Newest header version this reader understands.
pub const MAX_HEADER_VERSION: u16 = 2;

pub const PACKET_HEADER_SIZE: usize = 16;

/// Largest encoded metadata blob (excluding its length prefix).
pub const MAX_METADATA_LENGTH: usize = 32766;

const PACKET_VERSION: u8 = 0x20;
const CIPHER_AES_256_GCM: u8 = 0x00;

#[derive(Serialize, Deserialize)]
struct EncodedHeader {
    #[serde(rename = "v")]
    version: u16,
    #[serde(rename = "k", with = "hex_bytes")]
    wrapped_key: Vec<u8>,
}

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    /// Bytes taken by the header, including the length prefix.
    pub length: u64,
    pub wrapped_key: Vec<u8>,
}

/// Metadata sealed inside every file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "n", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "ct", default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(rename = "sz", default, skip_serializing_if = "is_zero")]
    pub size: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// A fully opened object.
#[derive(Debug)]
pub struct OpenedFile {
    pub header: ContainerHeader,
    pub metadata: Metadata,
    /// Size of the metadata blob including its length prefix.
    pub metadata_offset: u64,
    pub content: Vec<u8>,
}

fn corrupted(msg: &str) -> CapabilityError {
    CapabilityError::Corrupted(msg.to_string())
}

/// Parse the header at the start of `data`.
pub fn parse_header(data: &[u8]) -> Result<ContainerHeader, CapabilityError> {
    if data.len() < 3 {
        return Err(corrupted("input stream ended too quickly"));
    }
    let len = u16::from_le_bytes([data[0], data[1]]) as usize;
    if len == 0 || len + 2 > MAX_HEADER_SIZE || len + 2 > data.len() {
        return Err(corrupted("invalid header length"));
    }

    let encoded: EncodedHeader = serde_json::from_slice(&data[2..2 + len])
        .map_err(|e| CapabilityError::Corrupted(format!("invalid file header: {}", e)))?;
    if encoded.version > MAX_HEADER_VERSION {
        return Err(CapabilityError::Corrupted(format!(
            "file header uses version {} which is not supported",
            encoded.version
        )));
    }
    if encoded.wrapped_key.is_empty() {
        return Err(corrupted("invalid key found in file header"));
    }

    Ok(ContainerHeader {
        version: encoded.version,
        length: (len + 2) as u64,
        wrapped_key: encoded.wrapped_key,
    })
}

/// Unwrap the per-file key with the repository master key.
pub fn unwrap_file_key(
    master: &KeyMaterial,
    header: &ContainerHeader,
) -> Result<Zeroizing<[u8; AES_KEY_SIZE]>, CapabilityError> {
    let master = as_aes_key(master.as_bytes()).ok_or_else(|| corrupted("invalid master key"))?;
    let unwrapped = Zeroizing::new(
        unseal_aes_gcm(&header.wrapped_key, master)
            .map_err(|_| corrupted("cannot unwrap file key"))?,
    );
    let key: [u8; AES_KEY_SIZE] = unwrapped
        .as_slice()
        .try_into()
        .map_err(|_| corrupted("invalid file key length"))?;
    Ok(Zeroizing::new(key))
}

/// Decrypt consecutive stored packets, the first of which has sequence number `first_seq`.
pub fn open_packets(
    data: &[u8],
    file_key: &[u8; AES_KEY_SIZE],
    first_seq: u64,
) -> Result<Vec<u8>, CapabilityError> {
    let mut out = Vec::with_capacity(data.len());
    for (i, stored) in data.chunks(STORED_PACKET_SIZE as usize).enumerate() {
        out.extend_from_slice(&open_packet(stored, file_key, first_seq + i as u64)?);
    }
    Ok(out)
}

/// Decrypt one stored packet, which must carry sequence number `expected_seq`.
pub fn open_packet(
    stored: &[u8],
    file_key: &[u8; AES_KEY_SIZE],
    expected_seq: u64,
) -> Result<Vec<u8>, CapabilityError> {
    let expected_seq =
        u32::try_from(expected_seq).map_err(|_| corrupted("packet sequence number overflow"))?;
    if stored.len() <= PACKET_HEADER_SIZE + AES_TAG_SIZE {
        return Err(corrupted("truncated packet"));
    }
    let (header, ciphertext) = stored.split_at(PACKET_HEADER_SIZE);
    if header[0] != PACKET_VERSION || header[1] != CIPHER_AES_256_GCM {
        return Err(corrupted("unsupported packet format"));
    }

    let payload_len = u16::from_le_bytes([header[2], header[3]]) as usize + 1;
    if ciphertext.len() != payload_len + AES_TAG_SIZE {
        return Err(corrupted("packet length mismatch"));
    }
    let seq = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if seq != expected_seq {
        return Err(corrupted("packet sequence mismatch"));
    }

    let nonce: [u8; AES_IV_SIZE] = header[4..PACKET_HEADER_SIZE]
        .try_into()
        .map_err(|_| corrupted("truncated packet"))?;
    decrypt_aes_gcm(ciphertext, file_key, &nonce, &header[..4])
        .map_err(|_| corrupted("packet authentication failed"))
}

/// Split the metadata blob off the start of the plaintext stream.
///
/// Returns the metadata and the number of bytes it occupies (the metadata offset).
pub fn split_metadata(plain: &[u8]) -> Result<(Metadata, u64), CapabilityError> {
    if plain.len() < 2 {
        return Err(corrupted("missing metadata"));
    }
    let len = u16::from_le_bytes([plain[0], plain[1]]) as usize;
    if len > MAX_METADATA_LENGTH || len + 2 > plain.len() {
        return Err(corrupted("invalid metadata length"));
    }
    let metadata = if len == 0 {
        Metadata::default()
    } else {
        serde_json::from_slice(&plain[2..2 + len])
            .map_err(|e| CapabilityError::Corrupted(format!("invalid metadata: {}", e)))?
    };
    Ok((metadata, (len + 2) as u64))
}

/// Open a whole object: header, every packet, and metadata.
pub fn open_file(data: &[u8], master: &KeyMaterial) -> Result<OpenedFile, CapabilityError> {
    let header = parse_header(data)?;
    let file_key = unwrap_file_key(master, &header)?;
    let mut plain = open_packets(&data[header.length as usize..], &file_key, 0)?;
    let (metadata, metadata_offset) = split_metadata(&plain)?;
    let content = plain.split_off(metadata_offset as usize);
    Ok(OpenedFile {
        header,
        metadata,
        metadata_offset,
        content,
    })
}

/// Build a sealed object. Only the test suites write containers.
#[cfg(test)]
pub fn seal(data: &[u8], metadata: &Metadata, master: &[u8; AES_KEY_SIZE]) -> Vec<u8> {
    use crate::crypto::aes::{encrypt_aes_gcm, seal_aes_gcm};
    use crate::crypto::utils::{generate_file_key, generate_random_bytes};
    use crate::range::PACKET_SIZE;

    let file_key = generate_file_key();
    let header = serde_json::to_vec(&EncodedHeader {
        version: MAX_HEADER_VERSION,
        wrapped_key: seal_aes_gcm(&file_key, master).unwrap(),
    })
    .unwrap();

    let mut out = Vec::new();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(&header);

    let encoded_metadata = serde_json::to_vec(metadata).unwrap();
    let mut plain = Vec::with_capacity(2 + encoded_metadata.len() + data.len());
    plain.extend_from_slice(&(encoded_metadata.len() as u16).to_le_bytes());
    plain.extend_from_slice(&encoded_metadata);
    plain.extend_from_slice(data);

    for (seq, chunk) in plain.chunks(PACKET_SIZE as usize).enumerate() {
        let mut packet_header = [0u8; PACKET_HEADER_SIZE];
        packet_header[0] = PACKET_VERSION;
        packet_header[1] = CIPHER_AES_256_GCM;
        packet_header[2..4].copy_from_slice(&((chunk.len() - 1) as u16).to_le_bytes());
        packet_header[4..8].copy_from_slice(&(seq as u32).to_le_bytes());
        packet_header[8..].copy_from_slice(&generate_random_bytes(8));

        let nonce: [u8; AES_IV_SIZE] = packet_header[4..].try_into().unwrap();
        let ciphertext = encrypt_aes_gcm(chunk, &file_key, &nonce, &packet_header[..4]).unwrap();
        out.extend_from_slice(&packet_header);
        out.extend_from_slice(&ciphertext);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{PACKET_SIZE, PACKET_OVERHEAD};

    const MASTER: [u8; 32] = [0x42; 32];

    fn metadata(size: u64) -> Metadata {
        Metadata {
            name: "report.pdf".into(),
            content_type: "application/pdf".into(),
            size,
        }
    }

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_open_small_file() {
        let data = content(1000);
        let sealed = seal(&data, &metadata(1000), &MASTER);

        let opened = open_file(&sealed, &KeyMaterial::new(MASTER.to_vec())).unwrap();
        assert_eq!(opened.header.version, MAX_HEADER_VERSION);
        assert_eq!(opened.metadata, metadata(1000));
        assert_eq!(
            opened.metadata_offset,
            2 + serde_json::to_vec(&metadata(1000)).unwrap().len() as u64
        );
        assert_eq!(opened.content, data);
    }

    #[test]
    fn test_packet_sizes() {
        let data = content(3 * PACKET_SIZE as usize);
        let sealed = seal(&data, &metadata(data.len() as u64), &MASTER);
        let header = parse_header(&sealed).unwrap();

        let body = sealed.len() as u64 - header.length;
        // Four packets: three full ones plus the metadata spill-over.
        assert_eq!(body, 3 * (PACKET_SIZE + PACKET_OVERHEAD) + (body % STORED_PACKET_SIZE));
        assert_eq!(body / STORED_PACKET_SIZE, 3);
    }

    #[test]
    fn test_wrong_master_key() {
        let sealed = seal(b"hello", &metadata(5), &MASTER);
        let err = open_file(&sealed, &KeyMaterial::new(vec![0x43; 32])).unwrap_err();
        assert!(matches!(err, CapabilityError::Corrupted(_)));
    }

    #[test]
    fn test_tampered_packet_rejected() {
        let mut sealed = seal(b"hello world", &metadata(11), &MASTER);
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        let err = open_file(&sealed, &KeyMaterial::new(MASTER.to_vec())).unwrap_err();
        assert_eq!(err.to_string(), "Invalid data: packet authentication failed");
    }

    #[test]
    fn test_sequence_mismatch_rejected() {
        let sealed = seal(&content(100), &metadata(100), &MASTER);
        let header = parse_header(&sealed).unwrap();
        let key = unwrap_file_key(&KeyMaterial::new(MASTER.to_vec()), &header).unwrap();
        let err = open_packets(&sealed[header.length as usize..], &key, 1).unwrap_err();
        assert_eq!(err.to_string(), "Invalid data: packet sequence mismatch");
    }

    #[test]
    fn test_unsupported_header_version() {
        let json = br#"{"v":3,"k":"00"}"#;
        let mut data = (json.len() as u16).to_le_bytes().to_vec();
        data.extend_from_slice(json);
        let err = parse_header(&data).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid data: file header uses version 3 which is not supported"
        );
    }

    #[test]
    fn test_truncated_header() {
        assert!(parse_header(&[0x10]).is_err());
        assert!(parse_header(&[0xFF, 0x00, b'{']).is_err());
    }

    #[test]
    fn test_split_metadata_limits() {
        let mut blob = 40000u16.to_le_bytes().to_vec();
        blob.extend_from_slice(&[b' '; 16]);
        assert!(split_metadata(&blob).is_err());

        let (md, offset) = split_metadata(&[0, 0, 1, 2, 3]).unwrap();
        assert_eq!(md, Metadata::default());
        assert_eq!(offset, 2);
    }

    #[test]
    fn test_metadata_json_keys() {
        let json = serde_json::to_string(&metadata(7)).unwrap();
        assert_eq!(json, r#"{"n":"report.pdf","ct":"application/pdf","sz":7}"#);
    }
}

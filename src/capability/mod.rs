//! Decryption capability seam.
//!
//! The gateway never decrypts or parses the encrypted index itself. It holds
//! a `Capability` (unlock, index access, metadata lookup, decrypt-of-request)
//! loaded on demand by a `CapabilityLoader`, and a `RepoIndex` handle obtained
//! once the repository is unlocked. `sealed` is the implementation shipped
//! with the binary; tests substitute in-memory fakes.

pub mod sealed;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::utils::hex_bytes_opt;
use crate::gateway::{GatewayRequest, GatewayResponse};

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Invalid passphrase")]
    InvalidPassphrase,
    #[error("File not found")]
    NotFound,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Invalid data: {0}")]
    Corrupted(String),
    #[error("request timed out")]
    Timeout,
    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

/// Unwrapped repository master key. Memory only; wiped when the last clone drops.
#[derive(Clone)]
pub struct KeyMaterial(Arc<Zeroizing<Vec<u8>>>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(Zeroizing::new(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED; {}])", self.0.len())
    }
}

/// Result of a successful unlock.
#[derive(Debug, Clone)]
pub struct UnlockedKey {
    pub key: KeyMaterial,
    pub key_id: String,
}

/// One file or directory in the encrypted index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// SHA-256 of the plaintext; hex-encoded on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "hex_bytes_opt"
    )]
    pub digest: Option<Vec<u8>>,
}

/// Metadata stored inside an encrypted file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoStats {
    pub file_count: u64,
}

/// Catalog of files in the encrypted store. Read-only.
#[async_trait]
pub trait RepoIndex: Send + Sync {
    /// Re-fetch the index; without `force` a cached copy is kept.
    async fn refresh(&self, force: bool) -> Result<(), CapabilityError>;

    async fn stat(&self) -> Result<RepoStats, CapabilityError>;

    async fn get_file_by_path(&self, path: &str) -> Result<Option<IndexEntry>, CapabilityError>;

    async fn get_file_by_id(&self, file_id: &str) -> Result<Option<IndexEntry>, CapabilityError>;

    /// Children of `path` (which must start with `/`). Entry paths are names
    /// relative to the folder.
    async fn list_folder(&self, path: &str) -> Result<Vec<IndexEntry>, CapabilityError>;
}

/// The decrypt/unlock/index engine.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unwrap the master key with a passphrase.
    async fn unlock(&self, passphrase: &str) -> Result<UnlockedKey, CapabilityError>;

    /// Build an index handle bound to `key`.
    fn get_index(&self, key: &KeyMaterial) -> Result<Arc<dyn RepoIndex>, CapabilityError>;

    async fn get_file_metadata(
        &self,
        key: &KeyMaterial,
        file_id: &str,
    ) -> Result<FileMetadata, CapabilityError>;

    /// Fetch and decrypt the file named by `request`, honouring its `Range`.
    /// The body streams as packets are decrypted.
    async fn decrypt_request(
        &self,
        key: &KeyMaterial,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, CapabilityError>;

    /// Drop everything decrypted under the current key. Called when the
    /// capability is disabled and before a new key is installed.
    fn forget_keys(&self);
}

/// Loads the capability runtime. Called at most once per process.
#[async_trait]
pub trait CapabilityLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Capability>, CapabilityError>;
}

//! Sealed container capability.
//!
//! Reads encrypted objects from the origin's `/rawfile/` endpoint and
//! decrypts them in-process. Passphrase unlock uses the key slots in
//! `_info.json`; the file catalog lives in the sealed `_index` object.
//! Read-only: nothing here ever writes to the origin.

pub mod cache;
pub mod container;
pub mod index;
pub mod keys;
pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use regex::Regex;
use zeroize::Zeroizing;

use crate::api::client::OriginClient;
use crate::capability::{
    Capability, CapabilityError, CapabilityLoader, FileMetadata, KeyMaterial, RepoIndex,
    UnlockedKey,
};
use crate::crypto::aes::AES_KEY_SIZE;
use crate::gateway::{GatewayBody, GatewayRequest, GatewayResponse};
use crate::range::{parse_range_header, RequestRange, PACKET_OVERHEAD, PACKET_SIZE, STORED_PACKET_SIZE};

use cache::{CachedHeader, HeaderCache};
use container::{Metadata, MAX_HEADER_SIZE};
use index::SealedIndex;
use keys::{RepoInfo, INFO_OBJECT};
use stream::PlaintextWindow;

/// Request path of a file read: `/file/<uuid>` or `/rawfile/<uuid>`.
const FILE_REQUEST_PATTERN: &str =
    r"^/?(raw)?file/([a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12})$";

/// Last byte of the first request for an uncached file: the header plus the
/// whole first packet, which always contains the metadata.
const METADATA_PEEK_END: u64 = PACKET_SIZE + PACKET_OVERHEAD + MAX_HEADER_SIZE as u64;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct SealedCapability {
    origin: Arc<OriginClient>,
    headers: HeaderCache,
    file_request: Regex,
}

impl SealedCapability {
    pub fn new(origin: Arc<OriginClient>) -> Result<Self, CapabilityError> {
        let file_request = Regex::new(FILE_REQUEST_PATTERN)
            .map_err(|e| CapabilityError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            origin,
            headers: HeaderCache::new(),
            file_request,
        })
    }

    fn file_id<'a>(&self, path: &'a str) -> Result<&'a str, CapabilityError> {
        self.file_request
            .captures(path)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str())
            .ok_or_else(|| CapabilityError::InvalidRequest("File ID not found in the URL".to_string()))
    }

    /// Header, metadata and file key for `file_id`, from the cache or a
    /// short ranged read. A cached entry is only returned to a key that
    /// unwraps its file key.
    async fn file_header(
        &self,
        key: &KeyMaterial,
        file_id: &str,
    ) -> Result<(CachedHeader, Zeroizing<[u8; AES_KEY_SIZE]>), CapabilityError> {
        if let Some(cached) = self.headers.get(file_id) {
            let file_key = container::unwrap_file_key(key, &cached.header)?;
            return Ok((cached, file_key));
        }

        let peek = format!("bytes=0-{}", METADATA_PEEK_END);
        let data = self.origin.get_object(file_id, Some(&peek)).await?;
        let header = container::parse_header(&data)?;
        let file_key = container::unwrap_file_key(key, &header)?;

        let start = header.length as usize;
        let end = data.len().min(start + STORED_PACKET_SIZE as usize);
        let first = container::open_packet(&data[start.min(end)..end], &file_key, 0)?;
        let (metadata, metadata_offset) = container::split_metadata(&first)?;

        let cached = CachedHeader {
            header,
            metadata,
            metadata_offset,
        };
        self.headers.put(file_id, cached.clone());
        Ok((cached, file_key))
    }

    async fn decrypt_full(
        &self,
        key: &KeyMaterial,
        file_id: &str,
    ) -> Result<GatewayResponse, CapabilityError> {
        let (cached, file_key) = self.file_header(key, file_id).await?;
        let window = PlaintextWindow {
            first_seq: 0,
            skip: cached.metadata_offset,
            length: Some(cached.metadata.size).filter(|size| *size > 0),
        };
        log::debug!("Decrypting {} in full", file_id);

        let packets = format!("bytes={}-", cached.header.length);
        let upstream = self.origin.get_object_stream(file_id, Some(&packets)).await?;
        let body = stream::decrypt_stream(upstream, file_key, window);

        let mut res = Response::new(GatewayBody::from_stream(body));
        set_content_headers(&mut res, &cached.metadata);
        let headers = res.headers_mut();
        if let Some(length) = window.length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        Ok(res)
    }

    async fn decrypt_range(
        &self,
        key: &KeyMaterial,
        file_id: &str,
        mut range: RequestRange,
    ) -> Result<GatewayResponse, CapabilityError> {
        let (cached, file_key) = self.file_header(key, file_id).await?;
        range.header_offset = cached.header.length;
        range.metadata_offset = cached.metadata_offset;
        range.set_file_size(cached.metadata.size);
        log::debug!("Decrypting {} with {}", file_id, range);

        let mut res = if range.is_unsatisfiable() {
            let mut res = Response::new(GatewayBody::empty());
            *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            res
        } else {
            let upstream = self
                .origin
                .get_object_stream(file_id, Some(&range.request_header_value()))
                .await?;
            let window = PlaintextWindow {
                first_seq: range.start_package(),
                skip: range.skip_beginning(),
                length: Some(range.length),
            };
            let body = stream::decrypt_stream(upstream, file_key, window);

            let mut res = Response::new(GatewayBody::from_stream(body));
            *res.status_mut() = StatusCode::PARTIAL_CONTENT;
            res.headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(range.length));
            res
        };

        set_content_headers(&mut res, &cached.metadata);
        let content_range = if range.is_unsatisfiable() {
            format!("bytes */{}", range.file_size)
        } else {
            range.response_header_value()
        };
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            res.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        Ok(res)
    }
}

/// `Content-Type` and `Content-Disposition` from the file's metadata.
fn set_content_headers(res: &mut GatewayResponse, metadata: &Metadata) {
    let headers = res.headers_mut();

    let content_type = if metadata.content_type.is_empty() {
        DEFAULT_CONTENT_TYPE
    } else {
        metadata.content_type.as_str()
    };
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );

    let mut disposition = "inline".to_string();
    let name: String = metadata
        .name
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect();
    if !name.is_empty() {
        disposition.push_str(&format!("; filename=\"{}\"", name));
    }
    let value = HeaderValue::from_bytes(disposition.as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));
    headers.insert(header::CONTENT_DISPOSITION, value);
}

#[async_trait]
impl Capability for SealedCapability {
    async fn unlock(&self, passphrase: &str) -> Result<UnlockedKey, CapabilityError> {
        let data = self.origin.get_object(INFO_OBJECT, None).await?;
        let info: RepoInfo = serde_json::from_slice(&data)
            .map_err(|e| CapabilityError::Corrupted(format!("invalid repository info: {}", e)))?;

        let unlocked = keys::unlock_with_passphrase(&info, passphrase)?;
        log::info!("Repository unlocked with key {}", unlocked.key_id);
        Ok(unlocked)
    }

    fn get_index(&self, key: &KeyMaterial) -> Result<Arc<dyn RepoIndex>, CapabilityError> {
        if key.is_empty() {
            return Err(CapabilityError::InvalidRequest("Empty master key".to_string()));
        }
        Ok(Arc::new(SealedIndex::new(self.origin.clone(), key.clone())))
    }

    async fn get_file_metadata(
        &self,
        key: &KeyMaterial,
        file_id: &str,
    ) -> Result<FileMetadata, CapabilityError> {
        let (cached, _) = self.file_header(key, file_id).await?;
        let metadata = cached.metadata;
        Ok(FileMetadata {
            name: metadata.name,
            mime_type: Some(metadata.content_type).filter(|ct| !ct.is_empty()),
            size: Some(metadata.size).filter(|sz| *sz > 0),
        })
    }

    async fn decrypt_request(
        &self,
        key: &KeyMaterial,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, CapabilityError> {
        let file_id = self.file_id(request.uri().path())?;

        let range = match request.headers().get(header::RANGE) {
            Some(value) => {
                let value = value.to_str().map_err(|e| {
                    CapabilityError::InvalidRequest(format!("Cannot parse Range header: {}", e))
                })?;
                parse_range_header(value).map_err(|e| {
                    CapabilityError::InvalidRequest(format!("Cannot parse Range header: {}", e))
                })?
            }
            None => None,
        };

        match range {
            Some((start, length)) => {
                self.decrypt_range(key, file_id, RequestRange::new(start, length))
                    .await
            }
            None => self.decrypt_full(key, file_id).await,
        }
    }

    fn forget_keys(&self) {
        self.headers.clear();
    }
}

/// Builds a `SealedCapability` on first enable.
pub struct SealedLoader {
    origin: Arc<OriginClient>,
}

impl SealedLoader {
    pub fn new(origin: Arc<OriginClient>) -> Self {
        Self { origin }
    }
}

#[async_trait]
impl CapabilityLoader for SealedLoader {
    async fn load(&self) -> Result<Arc<dyn Capability>, CapabilityError> {
        log::info!("Loading sealed container capability for {}", self.origin.base_url());
        Ok(Arc::new(SealedCapability::new(self.origin.clone())?))
    }
}

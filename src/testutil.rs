//! Test fixtures: an in-process origin server and an in-memory capability.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::capability::sealed::index::Catalog;
use crate::capability::{
    Capability, CapabilityError, CapabilityLoader, FileMetadata, IndexEntry, KeyMaterial,
    RepoIndex, RepoStats, UnlockedKey,
};
use crate::gateway::{GatewayBody, GatewayRequest, GatewayResponse};
use crate::range::parse_range_header;

/// Read a whole response body, streamed or not.
pub async fn body_bytes(res: GatewayResponse) -> Bytes {
    res.into_body().into_bytes().await.unwrap()
}

// ── Fake origin ──

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub range: Option<String>,
    pub body: Bytes,
}

#[derive(Clone)]
struct Route {
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
    ranged: bool,
}

/// Builder for an origin server bound to an ephemeral local port.
#[derive(Default)]
pub struct FakeOrigin {
    routes: HashMap<String, Route>,
}

impl FakeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` as JSON at `path` for any method.
    pub fn json(mut self, path: &str, status: StatusCode, body: &str) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status,
                content_type: "application/json",
                body: Bytes::from(body.to_string()),
                ranged: false,
            },
        );
        self
    }

    /// Serve a raw object at `/rawfile/<name>`, honouring `Range`.
    pub fn object(mut self, name: &str, data: Vec<u8>) -> Self {
        self.routes.insert(
            format!("/rawfile/{}", name),
            Route {
                status: StatusCode::OK,
                content_type: "application/octet-stream",
                body: Bytes::from(data),
                ranged: true,
            },
        );
        self
    }

    pub async fn spawn(self) -> RunningOrigin {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(self.routes);
        let log: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let task_log = log.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = task_log.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let routes = routes.clone();
                        let log = log.clone();
                        async move { Ok::<_, Infallible>(respond(&routes, &log, req).await) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        RunningOrigin { addr, log, task }
    }
}

async fn respond(
    routes: &HashMap<String, Route>,
    log: &Mutex<Vec<RecordedRequest>>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let range = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = req
        .into_body()
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();
    log.lock().push(RecordedRequest {
        method,
        path: path.clone(),
        range: range.clone(),
        body,
    });

    let Some(route) = routes.get(&path) else {
        let mut res = Response::new(Full::new(Bytes::from_static(b"not found")));
        *res.status_mut() = StatusCode::NOT_FOUND;
        return res;
    };

    let (status, body) = match (route.ranged, range.as_deref()) {
        (true, Some(range)) => {
            let len = route.body.len();
            match parse_range_header(range) {
                Ok(Some((start, length))) if (start as usize) < len => {
                    let start = start as usize;
                    let end = if length == 0 {
                        len
                    } else {
                        (start + length as usize).min(len)
                    };
                    (StatusCode::PARTIAL_CONTENT, route.body.slice(start..end))
                }
                _ => (StatusCode::RANGE_NOT_SATISFIABLE, Bytes::new()),
            }
        }
        _ => (route.status, route.body.clone()),
    };

    let mut res = Response::new(Full::new(body));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(route.content_type),
    );
    res
}

pub struct RunningOrigin {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl RunningOrigin {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }
}

impl Drop for RunningOrigin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Fake capability ──

pub const PASSPHRASE: &str = "correct horse battery staple";
pub const KEY_ID: &str = "key-1";
pub const MASTER_KEY: [u8; 32] = [7; 32];

pub fn file_entry(path: &str, file_id: &str) -> IndexEntry {
    IndexEntry {
        path: path.to_string(),
        file_id: Some(file_id.to_string()),
        date: Some("2021-03-01T10:00:00Z".to_string()),
        mime_type: Some("text/plain".to_string()),
        size: Some(12),
        digest: Some(vec![0xab, 0xcd]),
        ..Default::default()
    }
}

/// Catalog-backed index.
pub struct FakeIndex {
    catalog: Catalog,
}

impl FakeIndex {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self {
            catalog: Catalog::new(entries),
        }
    }
}

#[async_trait]
impl RepoIndex for FakeIndex {
    async fn refresh(&self, _force: bool) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn stat(&self) -> Result<RepoStats, CapabilityError> {
        Ok(RepoStats {
            file_count: self.catalog.len() as u64,
        })
    }

    async fn get_file_by_path(&self, path: &str) -> Result<Option<IndexEntry>, CapabilityError> {
        Ok(self.catalog.by_path(path).cloned())
    }

    async fn get_file_by_id(&self, file_id: &str) -> Result<Option<IndexEntry>, CapabilityError> {
        Ok(self.catalog.by_id(file_id).cloned())
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<IndexEntry>, CapabilityError> {
        Ok(self.catalog.list_folder(path))
    }
}

/// In-memory capability. Decrypted responses echo the request path.
#[derive(Default)]
pub struct FakeCapability {
    pub entries: Vec<IndexEntry>,
    pub metadata: HashMap<String, FileMetadata>,
    pub unlocks: AtomicUsize,
    pub forgets: AtomicUsize,
    pub decrypted: Mutex<Vec<String>>,
}

impl FakeCapability {
    pub fn with_files(entries: Vec<IndexEntry>) -> Self {
        let metadata = entries
            .iter()
            .filter_map(|e| {
                let id = e.file_id.clone()?;
                let name = e.path.rsplit('/').next().unwrap_or_default().to_string();
                Some((
                    id,
                    FileMetadata {
                        name,
                        mime_type: e.mime_type.clone(),
                        size: e.size,
                    },
                ))
            })
            .collect();
        Self {
            entries,
            metadata,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Capability for FakeCapability {
    async fn unlock(&self, passphrase: &str) -> Result<UnlockedKey, CapabilityError> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        if passphrase != PASSPHRASE {
            return Err(CapabilityError::InvalidPassphrase);
        }
        Ok(UnlockedKey {
            key: KeyMaterial::new(MASTER_KEY.to_vec()),
            key_id: KEY_ID.to_string(),
        })
    }

    fn get_index(&self, key: &KeyMaterial) -> Result<Arc<dyn RepoIndex>, CapabilityError> {
        if key.is_empty() {
            return Err(CapabilityError::InvalidRequest("Empty master key".to_string()));
        }
        Ok(Arc::new(FakeIndex::new(self.entries.clone())))
    }

    async fn get_file_metadata(
        &self,
        _key: &KeyMaterial,
        file_id: &str,
    ) -> Result<FileMetadata, CapabilityError> {
        self.metadata
            .get(file_id)
            .cloned()
            .ok_or(CapabilityError::NotFound)
    }

    async fn decrypt_request(
        &self,
        _key: &KeyMaterial,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, CapabilityError> {
        let path = request.uri().path().to_string();
        self.decrypted.lock().push(path.clone());
        Ok(Response::new(GatewayBody::from(format!("plaintext:{}", path).into_bytes())))
    }

    fn forget_keys(&self) {
        self.forgets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader handing out one shared `FakeCapability`, counting loads.
pub struct FakeLoader {
    pub capability: Arc<FakeCapability>,
    pub loads: AtomicUsize,
    pub fail: bool,
    /// How long each load takes.
    pub delay: Duration,
}

impl FakeLoader {
    pub fn new(capability: FakeCapability) -> Self {
        Self {
            capability: Arc::new(capability),
            loads: AtomicUsize::new(0),
            fail: false,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(capability: FakeCapability, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(capability)
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(FakeCapability::default())
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityLoader for FakeLoader {
    async fn load(&self) -> Result<Arc<dyn Capability>, CapabilityError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(CapabilityError::Upstream("runtime unavailable".to_string()));
        }
        let capability: Arc<dyn Capability> = self.capability.clone();
        Ok(capability)
    }
}

//! HTTP client for the origin server.
//!
//! Used both to pass requests through unchanged and to fetch raw encrypted
//! objects (with `Range`) on behalf of the sealed capability. Response
//! bodies are streamed; only small objects are read into memory.

use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use hyper::header::{self, HeaderMap, HeaderName};
use hyper::{Response, StatusCode};
use reqwest::Client;

use crate::capability::sealed::stream::CiphertextStream;
use crate::capability::CapabilityError;
use crate::gateway::{GatewayBody, GatewayError, GatewayRequest, GatewayResponse};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
    header::TRAILER,
    header::PROXY_AUTHORIZATION,
    header::PROXY_AUTHENTICATE,
];

/// Client wrapper holding the origin base URL.
pub struct OriginClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OriginClient {
    /// Create a client for `base_url`.
    ///
    /// `timeout` bounds each read while streaming, and the whole exchange for
    /// objects read into memory.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .read_timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `req` to the origin as-is and stream the response back.
    pub async fn forward(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let (parts, body) = req.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path);

        let mut headers = parts.headers;
        strip_connection_headers(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        log::debug!("Forwarding {} {}", parts.method, path);
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_connection_headers(&mut headers);

        let mut res = Response::new(GatewayBody::from_stream(upstream.bytes_stream()));
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        Ok(res)
    }

    /// Fetch a raw encrypted object from `/rawfile/<name>` into memory, optionally ranged.
    pub async fn get_object(&self, name: &str, range: Option<&str>) -> Result<Bytes, CapabilityError> {
        let resp = self.request_object(name, range, Some(self.timeout)).await?;
        Ok(resp.bytes().await?)
    }

    /// Like `get_object`, but hands the bytes on as they arrive.
    pub async fn get_object_stream(
        &self,
        name: &str,
        range: Option<&str>,
    ) -> Result<CiphertextStream, CapabilityError> {
        let resp = self.request_object(name, range, None).await?;
        Ok(resp.bytes_stream().map_err(CapabilityError::from).boxed())
    }

    async fn request_object(
        &self,
        name: &str,
        range: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, CapabilityError> {
        let url = format!("{}/rawfile/{}", self.base_url, urlencoding::encode(name));
        let mut builder = self.client.get(&url);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await?;
        match resp.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(resp),
            StatusCode::NOT_FOUND => Err(CapabilityError::NotFound),
            status => Err(CapabilityError::Upstream(format!(
                "invalid response status code: {}",
                status.as_u16()
            ))),
        }
    }
}

fn strip_connection_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CapabilityError::Timeout
        } else {
            CapabilityError::Upstream(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{body_bytes, FakeOrigin};
    use hyper::Request;

    #[test]
    fn test_base_url_trimmed() {
        let client = OriginClient::new("http://127.0.0.1:3129///", Duration::from_secs(5));
        assert_eq!(client.base_url(), "http://127.0.0.1:3129");
    }

    #[tokio::test]
    async fn test_forward_preserves_status_and_body() {
        let origin = FakeOrigin::new()
            .json("/api/repos", StatusCode::OK, r#"{"repos":[]}"#)
            .spawn()
            .await;
        let client = OriginClient::new(&origin.url(), Duration::from_secs(5));

        let req = Request::builder()
            .method("GET")
            .uri("/api/repos?x=1")
            .header("connection", "keep-alive")
            .body(Bytes::new())
            .unwrap();
        let res = client.forward(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::CONNECTION).is_none());
        assert!(matches!(res.body(), GatewayBody::Streaming(_)));
        assert_eq!(body_bytes(res).await.as_ref(), br#"{"repos":[]}"#);
        assert_eq!(origin.requests()[0].path, "/api/repos");
    }

    #[tokio::test]
    async fn test_get_object_missing_is_not_found() {
        let origin = FakeOrigin::new().spawn().await;
        let client = OriginClient::new(&origin.url(), Duration::from_secs(5));
        assert!(matches!(
            client.get_object("nope", None).await,
            Err(CapabilityError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_get_object_forwards_range() {
        let origin = FakeOrigin::new()
            .object("blob", b"0123456789".to_vec())
            .spawn()
            .await;
        let client = OriginClient::new(&origin.url(), Duration::from_secs(5));
        let bytes = client.get_object("blob", Some("bytes=2-5")).await.unwrap();
        assert_eq!(bytes.as_ref(), b"2345");
        assert_eq!(origin.requests()[0].range.as_deref(), Some("bytes=2-5"));
    }

    #[tokio::test]
    async fn test_get_object_stream_yields_all_bytes() {
        let object: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
        let origin = FakeOrigin::new()
            .object("blob", object.clone())
            .spawn()
            .await;
        let client = OriginClient::new(&origin.url(), Duration::from_secs(5));

        let mut stream = client
            .get_object_stream("blob", Some("bytes=1000-"))
            .await
            .unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, &object[1000..]);

        assert!(matches!(
            client.get_object_stream("missing", None).await,
            Err(CapabilityError::NotFound)
        ));
    }
}

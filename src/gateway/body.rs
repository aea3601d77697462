//! Response bodies.
//!
//! JSON answers are built in memory. Decrypted files and pass-through
//! responses are streamed chunk by chunk as they arrive.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame, SizeHint};

pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum GatewayBody {
    /// Whole body in memory; `None` once it has been polled out.
    Buffered(Option<Bytes>),
    Streaming(UnsyncBoxBody<Bytes, BodyError>),
}

impl GatewayBody {
    pub fn empty() -> Self {
        GatewayBody::Buffered(None)
    }

    /// Body fed by `stream`. An error ends the response early.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BodyError> + 'static,
    {
        let frames = stream.map_ok(Frame::data).map_err(Into::into);
        GatewayBody::Streaming(StreamBody::new(frames).boxed_unsync())
    }

    /// Read the rest of the body into memory.
    pub async fn into_bytes(self) -> Result<Bytes, BodyError> {
        match self {
            GatewayBody::Buffered(bytes) => Ok(bytes.unwrap_or_default()),
            GatewayBody::Streaming(body) => Ok(body.collect().await?.to_bytes()),
        }
    }
}

impl From<Bytes> for GatewayBody {
    fn from(bytes: Bytes) -> Self {
        GatewayBody::Buffered(Some(bytes))
    }
}

impl From<Vec<u8>> for GatewayBody {
    fn from(bytes: Vec<u8>) -> Self {
        GatewayBody::from(Bytes::from(bytes))
    }
}

impl Body for GatewayBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BodyError>>> {
        match self.get_mut() {
            GatewayBody::Buffered(bytes) => Poll::Ready(
                bytes
                    .take()
                    .filter(|b| !b.is_empty())
                    .map(|b| Ok(Frame::data(b))),
            ),
            GatewayBody::Streaming(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            GatewayBody::Buffered(bytes) => bytes.as_ref().map_or(true, Bytes::is_empty),
            GatewayBody::Streaming(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            GatewayBody::Buffered(bytes) => {
                SizeHint::with_exact(bytes.as_ref().map_or(0, |b| b.len() as u64))
            }
            GatewayBody::Streaming(body) => body.size_hint(),
        }
    }
}

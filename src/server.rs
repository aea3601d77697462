//! HTTP/1.1 front end.
//!
//! One task per accepted connection. Request bodies are buffered before
//! dispatch and response bodies are streamed out. The dispatcher never
//! fails, so a connection task only ends on I/O errors or when the client
//! closes it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::gateway::{Dispatcher, GatewayError, GatewayResponse};

/// Back-off after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections forever. Cancel the future to stop.
pub async fn run(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        log::debug!("Connection from {}", peer);

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                async move { Ok::<_, Infallible>(handle(&dispatcher, req).await) }
            });
            if let Err(e) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                log::debug!("Connection from {} closed: {}", peer, e);
            }
        });
    }
}

async fn handle(dispatcher: &Dispatcher, req: Request<Incoming>) -> GatewayResponse {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let err = GatewayError::Status {
                status: StatusCode::BAD_REQUEST,
                message: format!("Failed to read request body: {}", e),
            };
            return err.into_response();
        }
    };

    dispatcher.serve(Request::from_parts(parts, body)).await
}

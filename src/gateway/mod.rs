//! Request dispatch.
//!
//! Every incoming request is matched against one of two ordered rule lists,
//! chosen by whether the capability is enabled. The first matching rule's
//! handler produces the response; requests no rule matches pass through to
//! the origin untouched. Handler errors become `{"error": message}` JSON.

pub mod body;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Response, StatusCode};
use regex::Regex;
use serde::Serialize;

use crate::api::client::OriginClient;
use crate::bus::MessageBus;
use crate::capability::Capability;
use crate::lifecycle::LifecycleHandle;
use crate::state::{Snapshot, Unlocked};

pub use body::GatewayBody;
pub use error::GatewayError;

/// Request bodies are buffered before dispatch; response bodies may stream.
pub type GatewayRequest = Request<Bytes>;
pub type GatewayResponse = Response<GatewayBody>;

/// Serialize `value` as a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> GatewayResponse {
    let (status, body) = match serde_json::to_vec(value) {
        Ok(body) => (status, body),
        Err(e) => {
            log::error!("Failed to serialize response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"Failed to serialize response"}"#.to_vec(),
            )
        }
    };
    let mut res = Response::new(GatewayBody::from(body));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    res
}

/// How a rule matches a request path.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Path starts with the string.
    Prefix(String),
    /// Regex tested against the path.
    Pattern(Regex),
}

impl Matcher {
    pub fn prefix(prefix: &str) -> Self {
        Matcher::Prefix(prefix.to_string())
    }

    /// Compile `pattern`, anchored at both ends.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{})$", pattern)).map(Matcher::Pattern)
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Matcher::Pattern(re) => re.is_match(path),
        }
    }
}

/// State a handler sees. `snapshot` is read once when the request arrives.
pub struct HandlerContext {
    pub snapshot: Arc<Snapshot>,
    pub origin: Arc<OriginClient>,
    pub lifecycle: LifecycleHandle,
    pub bus: MessageBus,
}

impl HandlerContext {
    /// Capability and key material, or `NotUnlocked`.
    pub fn require_unlocked(&self) -> Result<(&Arc<dyn Capability>, &Unlocked), GatewayError> {
        self.snapshot.unlocked().ok_or(GatewayError::NotUnlocked)
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError>;
}

pub struct RouteRule {
    pub matcher: Matcher,
    pub handler: Arc<dyn Handler>,
}

impl RouteRule {
    pub fn new(matcher: Matcher, handler: impl Handler + 'static) -> Self {
        Self {
            matcher,
            handler: Arc::new(handler),
        }
    }
}

/// Outcome of matching a request against the rule tables.
pub enum Dispatch {
    Handled(GatewayResponse),
    PassThrough(GatewayRequest),
}

pub struct Dispatcher {
    enabled_rules: Vec<RouteRule>,
    disabled_rules: Vec<RouteRule>,
    origin: Arc<OriginClient>,
    lifecycle: LifecycleHandle,
    bus: MessageBus,
}

impl Dispatcher {
    /// Dispatcher with the standard rule tables.
    pub fn new(
        origin: Arc<OriginClient>,
        lifecycle: LifecycleHandle,
        bus: MessageBus,
    ) -> Result<Self, regex::Error> {
        Ok(Self::with_rules(
            handlers::enabled_rules()?,
            handlers::disabled_rules(),
            origin,
            lifecycle,
            bus,
        ))
    }

    pub fn with_rules(
        enabled_rules: Vec<RouteRule>,
        disabled_rules: Vec<RouteRule>,
        origin: Arc<OriginClient>,
        lifecycle: LifecycleHandle,
        bus: MessageBus,
    ) -> Self {
        Self {
            enabled_rules,
            disabled_rules,
            origin,
            lifecycle,
            bus,
        }
    }

    fn rules_for(&self, snapshot: &Snapshot) -> &[RouteRule] {
        if snapshot.is_enabled() {
            &self.enabled_rules
        } else {
            &self.disabled_rules
        }
    }

    /// Run the first matching handler, or hand the request back for pass-through.
    pub async fn dispatch(&self, req: GatewayRequest) -> Dispatch {
        let snapshot = self.lifecycle.snapshot();
        let path = req.uri().path().to_string();
        let Some(rule) = self
            .rules_for(&snapshot)
            .iter()
            .find(|rule| rule.matcher.matches(&path))
        else {
            return Dispatch::PassThrough(req);
        };

        log::debug!(
            "{} {} intercepted ({})",
            req.method(),
            path,
            snapshot.status().label()
        );
        let ctx = HandlerContext {
            snapshot,
            origin: self.origin.clone(),
            lifecycle: self.lifecycle.clone(),
            bus: self.bus.clone(),
        };
        match rule.handler.handle(&ctx, req).await {
            Ok(res) => Dispatch::Handled(res),
            Err(e) => {
                log::warn!("{} failed: {}", path, e);
                Dispatch::Handled(e.into_response())
            }
        }
    }

    /// Dispatch, forwarding unmatched requests to the origin.
    pub async fn serve(&self, req: GatewayRequest) -> GatewayResponse {
        match self.dispatch(req).await {
            Dispatch::Handled(res) => res,
            Dispatch::PassThrough(req) => match self.origin.forward(req).await {
                Ok(res) => res,
                Err(e) => {
                    log::warn!("Pass-through failed: {}", e);
                    GatewayError::Status {
                        status: StatusCode::BAD_GATEWAY,
                        message: e.to_string(),
                    }
                    .into_response()
                }
            },
        }
    }
}

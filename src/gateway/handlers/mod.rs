//! Route handlers and the two standard rule tables.

pub mod file;
pub mod info;
pub mod metadata;
pub mod tree;
pub mod unlock;

use hyper::Method;

use super::{GatewayError, GatewayRequest, Matcher, RouteRule};

pub use file::FileHandler;
pub use info::InfoHandler;
pub use metadata::MetadataHandler;
pub use tree::TreeHandler;
pub use unlock::{CapabilityUnlockHandler, OriginUnlockHandler};

/// Routes intercepted while the capability is enabled. Order matters: first match wins.
pub fn enabled_rules() -> Result<Vec<RouteRule>, regex::Error> {
    Ok(vec![
        RouteRule::new(Matcher::prefix("/api/info"), InfoHandler),
        RouteRule::new(Matcher::prefix("/api/repo/unlock"), CapabilityUnlockHandler),
        RouteRule::new(Matcher::prefix("/api/tree"), TreeHandler),
        RouteRule::new(Matcher::prefix("/api/metadata"), MetadataHandler::new()?),
        // `/file` and anything below it, but not `/files` or `/filesystem`.
        RouteRule::new(Matcher::pattern(r"/file(?:/.*)?")?, FileHandler),
    ])
}

/// Routes intercepted while the capability is disabled or still loading.
pub fn disabled_rules() -> Vec<RouteRule> {
    vec![RouteRule::new(
        Matcher::prefix("/api/repo/unlock"),
        OriginUnlockHandler,
    )]
}

pub(crate) fn require_method(req: &GatewayRequest, method: Method) -> Result<(), GatewayError> {
    if req.method() == method {
        Ok(())
    } else {
        Err(GatewayError::InvalidMethod)
    }
}

/// Percent-decoded remainder of the request path after `prefix`.
pub(crate) fn path_after(req: &GatewayRequest, prefix: &str) -> Result<String, GatewayError> {
    let rest = req
        .uri()
        .path()
        .strip_prefix(prefix)
        .ok_or(GatewayError::InvalidPath)?;
    urlencoding::decode(rest)
        .map(|s| s.into_owned())
        .map_err(|_| GatewayError::InvalidPath)
}

/// Prefix `/` unless already present.
pub(crate) fn with_leading_slash(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

//! GET /file/<fileId>: decrypted content, optionally ranged.

use async_trait::async_trait;
use hyper::Method;

use crate::gateway::{GatewayError, GatewayRequest, GatewayResponse, Handler, HandlerContext};

use super::require_method;

pub struct FileHandler;

#[async_trait]
impl Handler for FileHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        require_method(&req, Method::GET)?;
        let (capability, unlocked) = ctx.require_unlocked()?;

        capability
            .decrypt_request(&unlocked.key, &req)
            .await
            .map_err(GatewayError::from)
    }
}

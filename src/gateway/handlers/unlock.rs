//! POST /api/repo/unlock, in both dispatch modes.

use async_trait::async_trait;
use hyper::{Method, StatusCode};
use zeroize::Zeroizing;

use crate::api::types::{UnlockRequest, UnlockResponse};
use crate::gateway::{
    json_response, GatewayError, GatewayRequest, GatewayResponse, Handler, HandlerContext,
};
use crate::messages::Notification;

use super::require_method;

const PASSPHRASE_KEY_TYPE: &str = "passphrase";

fn unsupported() -> GatewayError {
    GatewayError::InvalidRequestBody(
        "Capability-mediated unlock supports passphrases only".to_string(),
    )
}

/// Unlocks through the capability. Only passphrase keys are supported.
pub struct CapabilityUnlockHandler;

#[async_trait]
impl Handler for CapabilityUnlockHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        require_method(&req, Method::POST)?;

        let body: UnlockRequest = serde_json::from_slice(req.body()).map_err(|_| unsupported())?;
        let passphrase = match body.passphrase {
            Some(p) if body.key_type == PASSPHRASE_KEY_TYPE && !p.is_empty() => Zeroizing::new(p),
            _ => return Err(unsupported()),
        };

        let key_id = ctx.lifecycle.unlock(passphrase).await?;
        ctx.bus.broadcast(Notification::Unlocked);

        Ok(json_response(
            StatusCode::OK,
            &UnlockResponse {
                key_id,
                key_type: PASSPHRASE_KEY_TYPE.to_string(),
            },
        ))
    }
}

/// Lets the origin perform the unlock, announcing success to consumers.
pub struct OriginUnlockHandler;

#[async_trait]
impl Handler for OriginUnlockHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let res = ctx.origin.forward(req).await?;
        if res.status().is_success() {
            ctx.bus.broadcast(Notification::Unlocked);
        }
        Ok(res)
    }
}

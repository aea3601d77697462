//! GET /api/info: the origin's answer, overlaid with local unlock state.

use async_trait::async_trait;
use hyper::{Method, StatusCode};

use crate::api::types::InfoResponse;
use crate::gateway::{
    json_response, GatewayError, GatewayRequest, GatewayResponse, Handler, HandlerContext,
};

use super::require_method;

pub struct InfoHandler;

#[async_trait]
impl Handler for InfoHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        require_method(&req, Method::GET)?;

        let body = ctx
            .origin
            .forward(req)
            .await?
            .into_body()
            .into_bytes()
            .await
            .map_err(|e| GatewayError::UpstreamFailure(format!("Upstream request failed: {}", e)))?;
        if body.is_empty() {
            return Err(GatewayError::UpstreamFailure("Response is empty".to_string()));
        }
        let mut data: InfoResponse = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::UpstreamFailure(format!("Invalid response from origin: {}", e))
        })?;

        // Local state decides whether the repository counts as unlocked.
        match ctx.snapshot.unlocked() {
            Some((_, unlocked)) => {
                let stats = unlocked.index.stat().await?;
                data.repo_unlocked = Some(true);
                data.files = Some(stats.file_count);
                data.read_only = Some(true);
            }
            None => data.repo_unlocked = Some(false),
        }

        Ok(json_response(StatusCode::OK, &data))
    }
}

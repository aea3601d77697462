//! GET /api/tree/<path>: folder listing from the index.

use async_trait::async_trait;
use hyper::{Method, StatusCode};

use crate::api::types::TreeResponse;
use crate::gateway::{
    json_response, GatewayError, GatewayRequest, GatewayResponse, Handler, HandlerContext,
};

use super::{path_after, require_method, with_leading_slash};

pub struct TreeHandler;

#[async_trait]
impl Handler for TreeHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        require_method(&req, Method::GET)?;
        let (_, unlocked) = ctx.require_unlocked()?;

        let mut path = path_after(&req, "/api/tree")?;
        if path.is_empty() {
            path.push('/');
        }
        let path = with_leading_slash(path);

        let list: TreeResponse = unlocked.index.list_folder(&path).await?;
        Ok(json_response(StatusCode::OK, &list))
    }
}

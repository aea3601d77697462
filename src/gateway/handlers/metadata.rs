//! GET /api/metadata/<fileId or path>.

use async_trait::async_trait;
use hyper::{Method, StatusCode};
use regex::Regex;

use crate::api::types::MetadataResponse;
use crate::gateway::{
    json_response, GatewayError, GatewayRequest, GatewayResponse, Handler, HandlerContext,
};

use super::{path_after, require_method, with_leading_slash};

const FILE_ID_PATTERN: &str =
    r"(?i)^[0-9A-F]{8}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{12}$";

pub struct MetadataHandler {
    file_id: Regex,
}

impl MetadataHandler {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            file_id: Regex::new(FILE_ID_PATTERN)?,
        })
    }
}

/// Parent folder of `path`, including the trailing `/`.
fn parent_folder(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..=pos],
        None => "/",
    }
}

#[async_trait]
impl Handler for MetadataHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        require_method(&req, Method::GET)?;
        let (capability, unlocked) = ctx.require_unlocked()?;

        let target = path_after(&req, "/api/metadata/")?;
        let entry = if self.file_id.is_match(&target) {
            unlocked.index.get_file_by_id(&target).await?
        } else {
            unlocked
                .index
                .get_file_by_path(&with_leading_slash(target))
                .await?
        };
        let (entry, file_id) = match entry {
            Some(entry) => match entry.file_id.clone() {
                Some(id) => (entry, id),
                None => return Err(GatewayError::NotFound),
            },
            None => return Err(GatewayError::NotFound),
        };

        let metadata = capability.get_file_metadata(&unlocked.key, &file_id).await?;
        let res = MetadataResponse {
            folder: parent_folder(&entry.path).to_string(),
            file_id,
            name: metadata.name,
            date: entry.date,
            mime_type: metadata.mime_type,
            size: metadata.size,
            digest: entry.digest,
        };
        Ok(json_response(StatusCode::OK, &res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_folder() {
        assert_eq!(parent_folder("/a/b/c.txt"), "/a/b/");
        assert_eq!(parent_folder("/c.txt"), "/");
        assert_eq!(parent_folder("c.txt"), "/");
    }

    #[test]
    fn test_file_id_pattern_is_strict() {
        let handler = MetadataHandler::new().unwrap();
        assert!(handler.file_id.is_match("8d3c4a5e-1a2b-4c3d-8e9f-0a1b2c3d4e5f"));
        assert!(handler.file_id.is_match("8D3C4A5E-1A2B-4C3D-8E9F-0A1B2C3D4E5F"));
        assert!(!handler.file_id.is_match("8d3c4a5e1a2b4c3d8e9f0a1b2c3d4e5f"));
        assert!(!handler.file_id.is_match("/8d3c4a5e-1a2b-4c3d-8e9f-0a1b2c3d4e5f"));
        assert!(!handler.file_id.is_match("8d3c4a5e-1a2b-4c3d-8e9f-0a1b2c3d4e5fz"));
    }
}

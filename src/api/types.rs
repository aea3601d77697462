//! Request and response bodies of the origin's JSON API.
//!
//! All structs use camelCase serialization to match the API's JSON format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::IndexEntry;
use crate::crypto::utils::hex_bytes_opt;

/// Response from GET /api/info.
///
/// Fields the gateway does not touch are carried through in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_selected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_unlocked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpg_unlock: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of POST /api/repo/unlock.
#[derive(Debug, Clone, Deserialize)]
pub struct UnlockRequest {
    #[serde(rename = "type", default)]
    pub key_type: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Response of a capability-mediated unlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResponse {
    pub key_id: String,
    #[serde(rename = "type")]
    pub key_type: String,
}

/// Response from GET /api/metadata/<fileId or path>.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    pub file_id: String,
    pub folder: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "hex_bytes_opt"
    )]
    pub digest: Option<Vec<u8>>,
}

/// Response from GET /api/tree/<path>.
pub type TreeResponse = Vec<IndexEntry>;

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_keeps_unknown_fields() {
        let raw = r#"{"name":"vault-origin","repoSelected":true,"repoUnlocked":true,"custom":{"a":1}}"#;
        let mut info: InfoResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(info.repo_selected, Some(true));
        info.repo_unlocked = Some(false);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["repoUnlocked"], false);
        assert_eq!(json["name"], "vault-origin");
        assert_eq!(json["custom"]["a"], 1);
        assert!(json.get("files").is_none());
    }

    #[test]
    fn test_unlock_request_without_passphrase() {
        let req: UnlockRequest = serde_json::from_str(r#"{"type":"gpg"}"#).unwrap();
        assert_eq!(req.key_type, "gpg");
        assert!(req.passphrase.is_none());
    }

    #[test]
    fn test_unlock_response_shape() {
        let res = UnlockResponse {
            key_id: "k1".into(),
            key_type: "passphrase".into(),
        };
        assert_eq!(
            serde_json::to_string(&res).unwrap(),
            r#"{"keyId":"k1","type":"passphrase"}"#
        );
    }
}

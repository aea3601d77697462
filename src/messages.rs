//! Messages exchanged between consumers and the gateway.
//!
//! JSON objects tagged by `message`, e.g. `{"message":"set-wasm","enabled":true}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::utils::hex_bytes;

/// Sent by consumers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum Command {
    /// A newly attached consumer asks for `theme` and `wasm`.
    Connected,
    GetWasm,
    SetWasm {
        enabled: bool,
    },
    GetTheme,
    SetTheme {
        #[serde(default)]
        theme: String,
    },
    /// Install key material directly. Diagnostics only.
    SetMasterKey {
        #[serde(rename = "masterKey", with = "hex_bytes")]
        master_key: Vec<u8>,
        #[serde(rename = "keyId")]
        key_id: String,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connected => write!(f, "Connected"),
            Command::GetWasm => write!(f, "GetWasm"),
            Command::SetWasm { enabled } => write!(f, "SetWasm {{ enabled: {} }}", enabled),
            Command::GetTheme => write!(f, "GetTheme"),
            Command::SetTheme { theme } => write!(f, "SetTheme {{ theme: {:?} }}", theme),
            Command::SetMasterKey { key_id, .. } => {
                write!(f, "SetMasterKey {{ key_id: {:?}, .. }}", key_id)
            }
        }
    }
}

/// Sent to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum Notification {
    Wasm { enabled: bool },
    Theme { theme: String },
    Unlocked,
    /// Suspend interaction; a capability transition is in flight.
    Off,
    /// A command from this consumer was rejected.
    Error { error: String },
}

//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::settings::DATABASE_FILE;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:3130";
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:3129";

#[derive(Parser, Debug)]
#[command(name = "vaultgate", version, about = "Decrypting gateway for an encrypted file store")]
pub struct Args {
    /// Address to accept connections on
    #[arg(long, env = "VAULTGATE_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Base URL of the origin server
    #[arg(long, env = "VAULTGATE_ORIGIN", default_value = DEFAULT_ORIGIN)]
    pub origin: String,

    /// Directory for the settings database
    #[arg(long, env = "VAULTGATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Timeout for each origin request, in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Enable the capability at startup regardless of the stored flag
    #[arg(long)]
    pub enable: bool,

    /// Attach a JSON-lines consumer on stdin/stdout
    #[arg(long)]
    pub console: bool,
}

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    pub origin: String,
    pub data_dir: PathBuf,
    pub timeout: Duration,
    pub enable_on_start: bool,
    pub console: bool,
}

impl GatewayConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

impl From<Args> for GatewayConfig {
    fn from(args: Args) -> Self {
        let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
        Self {
            listen: args.listen,
            origin: args.origin.trim_end_matches('/').to_string(),
            data_dir,
            timeout: Duration::from_secs(args.timeout_secs.max(1)),
            enable_on_start: args.enable,
            console: args.console,
        }
    }
}

/// `<platform data dir>/vaultgate`, or `./vaultgate` when there is none.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vaultgate")
}

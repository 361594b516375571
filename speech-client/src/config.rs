use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default per-read timeout for a synthesis call
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Provider selection and provider-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier (edge-cli)
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Path to the synthesis binary (searched in PATH when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<PathBuf>,

    /// Seconds to wait for the next piece of output before giving up
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Proxy URL handed to the synthesis binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_kind() -> String {
    "edge-cli".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            command: None,
            timeout_secs: default_timeout(),
            proxy: None,
        }
    }
}

//! Transport configuration.

use serde::Deserialize;

/// Settings consulted by the transport layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Hostname advertised to clients in bound endpoints.
    pub hostname: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self { hostname }
    }
}

//! Gateway configuration, loaded once at boot.

use std::collections::HashSet;

use serde::Deserialize;

/// Process-wide gateway settings. Everything has a serde default so a
/// minimal TOML file (or none at all) yields a working configuration —
/// except that an empty allow-list refuses every session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Hostnames sessions may be opened to. Checked before any network
    /// activity.
    pub allow_list: HashSet<String>,
    /// Terminal type requested for interactive shells.
    pub term: String,
    /// Default PTY geometry.
    pub default_cols: u32,
    pub default_rows: u32,
    /// TCP + handshake deadline for session creation.
    pub connect_timeout_secs: u64,
    /// Idle window for vault unlock tokens.
    pub vault_token_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allow_list: HashSet::new(),
            term: "xterm-256color".to_string(),
            default_cols: 120,
            default_rows: 40,
            connect_timeout_secs: 15,
            vault_token_ttl_secs: 30 * 60,
        }
    }
}

impl GatewayConfig {
    /// Parse from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    #[must_use]
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allow_list.contains(host)
    }
}

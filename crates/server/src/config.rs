//! HTTP server settings.

use crate::version::{SdkVersion, DEFAULT_LEGACY_THRESHOLD};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47890;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// SDK versions below this get the legacy non-streaming body.
    pub legacy_sdk_threshold: SdkVersion,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            legacy_sdk_threshold: DEFAULT_LEGACY_THRESHOLD,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `DOCRUN_PORT` (or `PORT`) and
    /// `DOCRUN_LEGACY_SDK_THRESHOLD`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let port = lookup("DOCRUN_PORT")
            .or_else(|| lookup("PORT"))
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let legacy_sdk_threshold = lookup("DOCRUN_LEGACY_SDK_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.legacy_sdk_threshold);
        Self {
            port,
            legacy_sdk_threshold,
        }
    }
}

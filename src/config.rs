//! Top-level configuration for a tracking session.
//!
//! [`TrackerConfig`] bundles the settings of every component. Endpoints can
//! be overridden from the environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `B3_WS_URL` | `ws://localhost:8080/ws` |
//! | `B3_API_BASE_URL` | `http://localhost:8080/api` |

use crate::api::ApiConfig;
use crate::channel::ChannelConfig;
use crate::reconciler::ReconcilerConfig;

/// Default live stream endpoint of a locally running backend.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// Environment variable overriding [`TrackerConfig::ws_url`].
pub const WS_URL_ENV: &str = "B3_WS_URL";

/// Environment variable overriding [`ApiConfig::base_url`].
pub const API_BASE_URL_ENV: &str = "B3_API_BASE_URL";

/// Settings for [`RideReconciler::connect`](crate::reconciler::RideReconciler).
///
/// # Example
///
/// ```
/// use b3_ride_tracker::config::TrackerConfig;
///
/// let config = TrackerConfig::new("ws://bike.local:8080/ws", "http://bike.local:8080/api");
/// assert_eq!(config.api.base_url, "http://bike.local:8080/api");
/// ```
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub ws_url: String,
    pub api: ApiConfig,
    pub channel: ChannelConfig,
    pub reconciler: ReconcilerConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api: ApiConfig::default(),
            channel: ChannelConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn new(ws_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api: ApiConfig::new(api_base_url),
            ..Self::default()
        }
    }

    /// Defaults, with endpoints taken from the process environment when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(url) = get(WS_URL_ENV) {
            config.ws_url = url;
        }
        if let Some(url) = get(API_BASE_URL_ENV) {
            config.api.base_url = url;
        }
        config
    }

    #[must_use]
    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = TrackerConfig::default();
        assert_eq!(config.ws_url, "ws://localhost:8080/ws");
        assert_eq!(config.api.base_url, "http://localhost:8080/api");
    }

    #[test]
    fn lookup_overrides_endpoints() {
        let vars = HashMap::from([
            (WS_URL_ENV, "wss://tracker.example/ws".to_string()),
            (API_BASE_URL_ENV, "https://tracker.example/api".to_string()),
        ]);
        let config = TrackerConfig::from_lookup(|k| vars.get(k).cloned());
        assert_eq!(config.ws_url, "wss://tracker.example/ws");
        assert_eq!(config.api.base_url, "https://tracker.example/api");
    }

    #[test]
    fn empty_variables_are_ignored() {
        let config = TrackerConfig::from_lookup(|k| (k == WS_URL_ENV).then(|| "  ".to_string()));
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
    }
}

use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const BASE_URL_ENV_VAR: &str = "HEMOLINK_API_URL";
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Client-wide configuration. Everything has a sensible default so
/// `ClientConfig::default()` talks to a local backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin, without a trailing slash.
    pub base_url: String,
    /// Directory holding the persisted credential. `None` resolves to
    /// `~/.hemolink`.
    pub state_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
    /// TTL for the cached profile-derived dashboard payload.
    pub dashboard_cache_ttl: Duration,
    /// TTL for the cached blood-bank aggregation.
    pub stats_cache_ttl: Duration,
    /// Period of the orchestrator's background refresh.
    pub auto_refresh_interval: Duration,
    /// Window within which refresh triggers collapse into one fetch pass.
    pub debounce_window: Duration,
    /// Per-request timeout. The transport default applies when unset.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let base_url = std::env::var(BASE_URL_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            state_dir: None,
            retry: RetryPolicy::default(),
            dashboard_cache_ttl: Duration::from_secs(120),
            stats_cache_ttl: Duration::from_secs(300),
            auto_refresh_interval: Duration::from_secs(5 * 60),
            debounce_window: Duration::from_millis(300),
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_trailing_slash(base_url.into()),
            ..Self::default()
        }
    }

    /// Resolved state directory for the credential file.
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".hemolink"),
        }
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn with_base_url_normalizes_trailing_slash() {
        let config = ClientConfig::with_base_url("https://api.example.org/");
        assert_eq!(config.base_url, "https://api.example.org");
    }

    #[test]
    fn explicit_state_dir_wins() {
        let config = ClientConfig {
            state_dir: Some(PathBuf::from("/tmp/hemolink-test")),
            ..ClientConfig::default()
        };
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/hemolink-test"));
    }
}

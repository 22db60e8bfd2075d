//! Runtime configuration for the sync core.
//!
//! The REST base URL and the WebSocket URL are injected by the host
//! application (environment or builder); nothing here is hard-coded to a
//! particular deployment.

use std::time::Duration;

use crate::error::SyncError;

pub const ENV_BASE_URL: &str = "KIOSK_BASE_URL";
pub const ENV_WS_URL: &str = "KIOSK_WS_URL";
pub const ENV_DEBOUNCE_MS: &str = "KIOSK_DEBOUNCE_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "KIOSK_MAX_RECONNECT_ATTEMPTS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "KIOSK_REQUEST_TIMEOUT_SECS";

/// Quiet period before a quantity edit is written.
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(3_000);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(10_000);
/// Default timeout for REST requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const WS_PATH: &str = "/ws/orders";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub base_url: String,
    pub ws_url: String,
    pub debounce: Duration,
    pub max_reconnect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Build a config from a base URL, deriving the WebSocket URL from it.
    pub fn new(base_url: &str) -> Self {
        let base_url = normalize_base_url(base_url);
        let ws_url = derive_ws_url(&base_url);
        Self {
            base_url,
            ws_url,
            debounce: DEFAULT_DEBOUNCE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_ws_url(mut self, ws_url: &str) -> Self {
        self.ws_url = normalize_ws_url(ws_url);
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Read configuration from `KIOSK_*` environment variables.
    ///
    /// `KIOSK_BASE_URL` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, SyncError> {
        let base_url = std::env::var(ENV_BASE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SyncError::Config(format!("{ENV_BASE_URL} is not set")))?;

        let mut config = SyncConfig::new(&base_url);

        if let Some(ws) = env_string(ENV_WS_URL) {
            config = config.with_ws_url(&ws);
        }
        if let Some(ms) = env_number(ENV_DEBOUNCE_MS)? {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_number(ENV_MAX_RECONNECT_ATTEMPTS)? {
            config.max_reconnect_attempts = u32::try_from(attempts).map_err(|_| {
                SyncError::Config(format!("{ENV_MAX_RECONNECT_ATTEMPTS} is out of range"))
            })?;
        }
        if let Some(secs) = env_number(ENV_REQUEST_TIMEOUT_SECS)? {
            if secs == 0 {
                return Err(SyncError::Config(format!(
                    "{ENV_REQUEST_TIMEOUT_SECS} must be greater than zero"
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_number(key: &str) -> Result<Option<u64>, SyncError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| SyncError::Config(format!("{key} must be a whole number, got {raw:?}"))),
    }
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the REST base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") || url.starts_with("10.0.2.2")
        {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Same rules as [`normalize_base_url`] for `ws://` / `wss://` URLs. A bare
/// host gets the `/ws/orders` path appended.
pub fn normalize_ws_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("ws://") && !url.starts_with("wss://") {
        if let Some(rest) = url.strip_prefix("https://") {
            url = format!("wss://{rest}");
        } else if let Some(rest) = url.strip_prefix("http://") {
            url = format!("ws://{rest}");
        } else if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("ws://{url}");
        } else {
            url = format!("wss://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    let has_path = url
        .split_once("://")
        .map(|(_, rest)| rest.contains('/'))
        .unwrap_or(false);
    if !has_path {
        url.push_str(WS_PATH);
    }

    url
}

/// `https://host/api` becomes `wss://host/api/ws/orders`.
pub fn derive_ws_url(base_url: &str) -> String {
    let base = normalize_base_url(base_url);
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base
    };
    format!("{swapped}{WS_PATH}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            ENV_BASE_URL,
            ENV_WS_URL,
            ENV_DEBOUNCE_MS,
            ENV_MAX_RECONNECT_ATTEMPTS,
            ENV_REQUEST_TIMEOUT_SECS,
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("localhost:8080/"), "http://localhost:8080");
        assert_eq!(normalize_base_url("kiosk.example.edu//"), "https://kiosk.example.edu");
        assert_eq!(
            normalize_base_url(" http://10.0.2.2:8080 "),
            "http://10.0.2.2:8080"
        );
    }

    #[test]
    fn test_ws_url_derivation() {
        assert_eq!(
            derive_ws_url("http://localhost:8080"),
            "ws://localhost:8080/ws/orders"
        );
        assert_eq!(
            derive_ws_url("https://kiosk.example.edu/"),
            "wss://kiosk.example.edu/ws/orders"
        );
        assert_eq!(normalize_ws_url("localhost:8080"), "ws://localhost:8080/ws/orders");
        assert_eq!(
            normalize_ws_url("wss://push.example.edu/socket/"),
            "wss://push.example.edu/socket"
        );
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new("localhost:8080");
        assert_eq!(config.debounce, Duration::from_millis(3_000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.backoff_base, Duration::from_millis(1_000));
        assert_eq!(config.backoff_cap, Duration::from_millis(10_000));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_from_env_requires_base_url() {
        clear_env();
        assert!(matches!(SyncConfig::from_env(), Err(SyncError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        clear_env();
        std::env::set_var(ENV_BASE_URL, "https://kiosk.example.edu");
        std::env::set_var(ENV_WS_URL, "wss://push.example.edu/ws/orders");
        std::env::set_var(ENV_DEBOUNCE_MS, "2500");
        std::env::set_var(ENV_MAX_RECONNECT_ATTEMPTS, "3");

        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.base_url, "https://kiosk.example.edu");
        assert_eq!(config.ws_url, "wss://push.example.edu/ws/orders");
        assert_eq!(config.debounce, Duration::from_millis(2_500));
        assert_eq!(config.max_reconnect_attempts, 3);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage_numbers() {
        clear_env();
        std::env::set_var(ENV_BASE_URL, "localhost:8080");
        std::env::set_var(ENV_DEBOUNCE_MS, "soon");
        assert!(matches!(SyncConfig::from_env(), Err(SyncError::Config(_))));
        clear_env();
    }
}

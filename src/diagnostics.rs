//! Diagnostics for the kiosk sync core.
//!
//! Provides:
//! - **Log location and rotation**: used by `init_logging` to place and prune
//!   the rolling log files.
//! - **Support report**: a redacted JSON snapshot of a session (version,
//!   platform, endpoints, channel state) for the kiosk's support screen.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::channel::ChannelStatus;
use crate::config::SyncConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the daily rolling log files (`kiosk-sync.2026-01-31`).
pub const LOG_FILE_PREFIX: &str = "kiosk-sync";

const APP_DIR: &str = "com.hkotisk.kiosk";

// ---------------------------------------------------------------------------
// Support report
// ---------------------------------------------------------------------------

pub fn about_info() -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

/// Snapshot of a session's sync state with secrets stripped.
pub fn session_report(session_id: &str, config: &SyncConfig, channel: &ChannelStatus) -> Value {
    let report = json!({
        "about": about_info(),
        "sessionId": session_id,
        "baseUrl": config.base_url,
        "wsUrl": config.ws_url,
        "debounceMs": config.debounce.as_millis() as u64,
        "maxReconnectAttempts": config.max_reconnect_attempts,
        "channel": channel,
        "logDir": get_log_dir().to_string_lossy(),
    });
    redact_sensitive_fields(report)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["token", "authorization", "password", "secret", "cookie"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Returns the log directory path (same location used by `init_logging`).
pub fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR).join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs() {
    prune_logs_in(&get_log_dir(), MAX_LOG_FILES);
}

fn prune_logs_in(log_dir: &Path, keep: usize) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false);
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelPhase;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_about_info_has_required_fields() {
        let info = about_info();
        assert_eq!(info["name"], "kiosk-sync");
        assert!(info.get("version").is_some());
        assert!(info.get("platform").is_some());
    }

    #[test]
    fn test_log_dir_is_stable() {
        let d1 = get_log_dir();
        let d2 = get_log_dir();
        assert_eq!(d1, d2);
        assert!(d1.to_string_lossy().contains(APP_DIR));
    }

    #[test]
    fn test_prune_keeps_newest_log_files() {
        let dir = std::env::temp_dir().join(format!("kiosk_logs_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let now = SystemTime::now();
        for day in 0..5u64 {
            let path = dir.join(format!("{LOG_FILE_PREFIX}.2026-01-0{}", day + 1));
            let file = fs::File::create(&path).unwrap();
            file.set_modified(now - Duration::from_secs(86_400 * (5 - day)))
                .unwrap();
        }
        fs::write(dir.join("unrelated.txt"), "keep me").unwrap();

        prune_logs_in(&dir, 2);

        let mut left: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                format!("{LOG_FILE_PREFIX}.2026-01-04"),
                format!("{LOG_FILE_PREFIX}.2026-01-05"),
                "unrelated.txt".to_string(),
            ]
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_report_never_leaks_tokens() {
        let config = SyncConfig::new("http://kiosk.test");
        let status = ChannelStatus {
            phase: ChannelPhase::Failed,
            attempt: 5,
            max_attempts: 5,
            signals_received: 12,
        };
        let mut report = session_report("abc", &config, &status);
        assert_eq!(report["channel"]["phase"], "failed");
        assert_eq!(report["wsUrl"], "ws://kiosk.test/ws/orders");

        report["about"]["authToken"] = json!("secret-value");
        let redacted = redact_sensitive_fields(report);
        assert_eq!(redacted["about"]["authToken"], "[REDACTED]");
    }
}

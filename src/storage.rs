//! Persisted session credentials in the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate), on
//! macOS Keychain, and on Linux the kernel keyutils store. Only the bearer
//! token and the account it belongs to are kept; everything else about a
//! session is rebuilt from the backend.

use keyring::Entry;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::auth::AuthToken;
use crate::error::SyncError;

const SERVICE_NAME: &str = "kiosk-sync";

const KEY_AUTH_TOKEN: &str = "auth_token";
const KEY_ACCOUNT: &str = "account_email";

const ALL_KEYS: &[&str] = &[KEY_AUTH_TOKEN, KEY_ACCOUNT];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential. Returns `None` when the entry does not exist
/// or the platform store is unavailable.
fn get_credential(key: &str) -> Option<Zeroizing<String>> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(Zeroizing::new(pw)),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

fn set_credential(key: &str, value: &str) -> Result<(), SyncError> {
    let entry =
        Entry::new(SERVICE_NAME, key).map_err(|e| SyncError::Credentials(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| SyncError::Credentials(e.to_string()))
}

/// Silently succeeds if the entry does not exist.
fn delete_credential(key: &str) -> Result<(), SyncError> {
    let entry =
        Entry::new(SERVICE_NAME, key).map_err(|e| SyncError::Credentials(e.to_string()))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(SyncError::Credentials(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// Remember the token so the next launch can restore the session.
pub fn save_token(token: &AuthToken) -> Result<(), SyncError> {
    set_credential(KEY_AUTH_TOKEN, token.as_str())?;
    if let Some(subject) = token.subject() {
        set_credential(KEY_ACCOUNT, &subject)?;
    }
    info!(account = ?token.subject(), "session token stored");
    Ok(())
}

/// Load the stored token, discarding it if it is malformed or expired.
pub fn load_token() -> Option<AuthToken> {
    let raw = get_credential(KEY_AUTH_TOKEN)?;
    let token = AuthToken::new(&raw).ok()?;
    if token.ensure_valid().is_err() {
        info!("stored session token has expired, discarding");
        let _ = delete_credential(KEY_AUTH_TOKEN);
        return None;
    }
    Some(token)
}

pub fn stored_account() -> Option<String> {
    get_credential(KEY_ACCOUNT).map(|v| v.as_str().to_string())
}

/// Delete every stored credential (logout).
pub fn clear() -> Result<(), SyncError> {
    info!("clearing stored session credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}

//! OS keychain storage for provider credentials
//!
//! All provider keys live in a single keychain entry as JSON, so macOS
//! prompts at most once per session. Reads are cached for the lifetime of
//! the process.

use crate::credentials::Credentials;
use keyring::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

const KEYRING_SERVICE: &str = "diffpad-credentials";
const KEYRING_USERNAME: &str = "default";

type KeyringResult<T> = Result<T, String>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<Credentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<Credentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

fn lock_cache() -> std::sync::MutexGuard<'static, Option<Credentials>> {
    match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Tests and `DIFFPAD_DISABLE_KEYRING=1` keep credentials in memory only.
fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("DIFFPAD_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Warn about keychain errors only once per session
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    tracing::warn!(context, error = err, "couldn't access system keychain");
}

fn read_uncached() -> KeyringResult<Credentials> {
    if keyring_disabled() {
        return Ok(Credentials::default());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(Credentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

/// Read credentials, hitting the keychain only on first use.
pub fn read_credentials() -> KeyringResult<Credentials> {
    let mut guard = lock_cache();
    if let Some(ref cached) = *guard {
        return Ok(cached.clone());
    }
    let creds = read_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

pub fn write_credentials(creds: &Credentials) -> KeyringResult<()> {
    if !keyring_disabled() {
        let json = serde_json::to_string(creds).map_err(|e| e.to_string())?;
        let entry = keyring_entry().map_err(|e| e.to_string())?;
        entry.set_password(&json).map_err(|e| e.to_string())?;
    }
    *lock_cache() = Some(creds.clone());
    Ok(())
}

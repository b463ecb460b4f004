//! Persistent session state.
//!
//! The session is two keys in a durable key-value store: `token` (opaque
//! bearer string) and `user` (JSON text of the server's user object). A
//! session exists exactly when `token` is present.
//!
//! # Backends
//!
//! - [`MemoryStore`] - process-local, for tests and embedding
//! - [`FileStore`] - JSON file with owner-only permissions
//! - [`KeyringStore`] - single OS keyring entry holding JSON
//!
//! [`default_store`] picks the keyring in production and the file store when
//! `RTDS_ENV=test`.

mod file;
mod keychain;
mod memory;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

/// Store key holding the session token.
pub const TOKEN_KEY: &str = "token";
/// Store key holding the JSON-encoded user.
pub const USER_KEY: &str = "user";

/// Durable key-value storage for session state.
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Read a value, `None` if absent or unreadable.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting an absent key succeeds.
    fn remove(&self, key: &str) -> Result<()>;
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Bearer token attached to every outgoing message.
    pub token: String,
    /// Server-supplied user object.
    pub user: Value,
}

impl Session {
    /// Extract a session from a `{user, token}` server payload.
    ///
    /// Returns `None` when `token` is missing or not a string.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let token = payload.get(TOKEN_KEY)?.as_str()?;
        Some(Self {
            token: token.to_string(),
            user: payload.get(USER_KEY).cloned().unwrap_or(Value::Null),
        })
    }

    /// Load the stored session, if a token is present.
    pub fn load(store: &dyn SessionStore) -> Option<Self> {
        let token = store.get(TOKEN_KEY)?;
        let user = store
            .get(USER_KEY)
            .and_then(|raw| match serde_json::from_str(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    log::warn!("[Session] Stored user is not valid JSON: {e}");
                    None
                }
            })
            .unwrap_or(Value::Null);
        Some(Self { token, user })
    }

    /// Persist this session. The token is written last so a partially
    /// written session never reads as logged in.
    pub fn save(&self, store: &dyn SessionStore) -> Result<()> {
        store.set(USER_KEY, &serde_json::to_string(&self.user)?)?;
        store.set(TOKEN_KEY, &self.token)?;
        log::debug!("[Session] Stored session");
        Ok(())
    }

    /// Remove token and user. Failures are logged, not returned.
    pub fn clear(store: &dyn SessionStore) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = store.remove(key) {
                log::warn!("[Session] Failed to remove '{key}': {e:#}");
            }
        }
        log::debug!("[Session] Cleared session");
    }
}

/// Current token, if a session exists.
pub fn token(store: &dyn SessionStore) -> Option<String> {
    store.get(TOKEN_KEY)
}

/// Session store for the current runtime environment.
///
/// Keyring in production; `session.json` in the config dir under
/// `RTDS_ENV=test`.
pub fn default_store() -> Result<Arc<dyn SessionStore>> {
    if crate::env::should_skip_keyring() {
        let path = crate::config::Config::config_dir()?.join("session.json");
        return Ok(Arc::new(FileStore::new(path)));
    }
    Ok(Arc::new(KeyringStore::new()))
}

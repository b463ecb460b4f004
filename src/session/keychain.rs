//! OS keyring session store.
//!
//! Keeps every key in a single keyring entry (`rtds/session`) holding a JSON
//! object, so a session costs one keychain prompt rather than one per key.
//!
//! # Graceful Degradation
//!
//! A locked or inaccessible keyring reads as "no session". Writes surface the
//! error so login can report it.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use keyring::Entry;

use super::SessionStore;

/// Keyring service name.
const KEYRING_SERVICE: &str = "rtds";
/// Consolidated keyring entry name.
const KEYRING_SESSION: &str = "session";

/// [`SessionStore`] backed by the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
    entry: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringStore {
    /// Store using the default `rtds/session` entry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_entry(KEYRING_SERVICE, KEYRING_SESSION)
    }

    /// Store using a custom service and entry name.
    pub fn with_entry(service: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entry: entry.into(),
        }
    }

    fn open(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.entry)
            .map_err(|e| anyhow!("Failed to create keyring entry: {e:?}"))
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match self.open()?.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| anyhow!("Keyring session data corrupted: {e}")),
            Err(keyring::Error::NoEntry) => Ok(BTreeMap::new()),
            Err(e) => Err(anyhow!("Keyring read failed: {e:?}")),
        }
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let entry = self.open()?;
        if values.is_empty() {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => return Ok(()),
                Err(e) => return Err(anyhow!("Keyring delete failed: {e:?}")),
            }
        }
        let json = serde_json::to_string(values)?;
        entry
            .set_password(&json)
            .map_err(|e| anyhow!("Failed to store session in keyring: {e:?}"))
    }
}

impl SessionStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.read_all() {
            Ok(mut values) => values.remove(key),
            Err(e) => {
                log::warn!("[Session] {e:#}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.read_all().unwrap_or_default();
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.read_all().unwrap_or_default();
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

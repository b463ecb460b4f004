//! Endpoint options and configuration persistence.
//!
//! [`EndpointOptions`] is what [`crate::Client::configure`] takes: either a
//! full URL or a port resolved against the client's origin. [`Config`] is the
//! on-disk form used by the `rtds` binary, with environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};
use url::Url;

use crate::error::ClientError;

/// Port used when neither a URL nor a port is configured.
pub const DEFAULT_PORT: u16 = 3201;

/// Origin that `port`-only endpoints are resolved against by default.
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// Where to connect: `{ url }` XOR `{ port }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOptions {
    /// Full endpoint URL, used verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Port on the current origin's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl EndpointOptions {
    /// Options naming a full URL.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            port: None,
        }
    }

    /// Options naming a port on the origin host.
    #[must_use]
    pub fn port(port: u16) -> Self {
        Self {
            url: None,
            port: Some(port),
        }
    }

    /// Resolve to a concrete endpoint URL.
    ///
    /// A `url` is parsed as-is. A `port` becomes
    /// `<origin-scheme>://<origin-host>:<port>`.
    pub fn resolve(&self, origin: &Url) -> Result<Url, ClientError> {
        match (&self.url, self.port) {
            (Some(_), Some(_)) => Err(ClientError::Config(
                "url and port are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ClientError::Config(
                "either url or port is required".to_string(),
            )),
            (Some(url), None) => Url::parse(url)
                .map_err(|e| ClientError::Config(format!("invalid url {url}: {e}"))),
            (None, Some(port)) => {
                let host = origin.host_str().ok_or_else(|| {
                    ClientError::Config(format!("origin {origin} has no host"))
                })?;
                let raw = format!("{}://{}:{}", origin.scheme(), host, port);
                Url::parse(&raw)
                    .map_err(|e| ClientError::Config(format!("invalid endpoint {raw}: {e}")))
            }
        }
    }
}

/// Persistent configuration for the `rtds` binary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Full server URL. Takes precedence over `port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Server port on the origin host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Origin that a bare port is resolved against.
    #[serde(default = "default_origin")]
    pub origin: String,
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            port: None,
            origin: default_origin(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `RTDS_CONFIG_DIR` overrides the platform config dir.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("RTDS_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("rtds")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|e| {
            log::debug!("[Config] Using defaults: {e:#}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("RTDS_URL") {
            self.url = Some(url);
            self.port = None;
        }

        if let Some(port) = var("RTDS_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.port = Some(port);
                    self.url = None;
                }
                Err(e) => log::warn!("[Config] Ignoring RTDS_PORT={port}: {e}"),
            }
        }

        if let Some(origin) = var("RTDS_ORIGIN") {
            self.origin = origin;
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Endpoint options derived from this config.
    ///
    /// A URL wins over a port; with neither, [`DEFAULT_PORT`] is used.
    #[must_use]
    pub fn endpoint(&self) -> EndpointOptions {
        match (&self.url, self.port) {
            (Some(url), _) => EndpointOptions::url(url.clone()),
            (None, Some(port)) => EndpointOptions::port(port),
            (None, None) => EndpointOptions::port(DEFAULT_PORT),
        }
    }

    /// Parsed origin URL.
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("invalid origin: {}", self.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn origin() -> Url {
        Url::parse("https://app.example.com").unwrap()
    }

    #[test]
    fn test_resolve_url_verbatim() {
        let url = EndpointOptions::url("ws://data.example.com:9000/sync")
            .resolve(&origin())
            .unwrap();
        assert_eq!(url.as_str(), "ws://data.example.com:9000/sync");
    }

    #[test]
    fn test_resolve_port_against_origin() {
        let url = EndpointOptions::port(2999).resolve(&origin()).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("app.example.com"));
        assert_eq!(url.port(), Some(2999));
    }

    #[test]
    fn test_resolve_rejects_both_and_neither() {
        let both = EndpointOptions {
            url: Some("http://a".to_string()),
            port: Some(1),
        };
        assert!(matches!(both.resolve(&origin()), Err(ClientError::Config(_))));
        assert!(matches!(
            EndpointOptions::default().resolve(&origin()),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_url() {
        let result = EndpointOptions::url("not a url").resolve(&origin());
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_default_config_uses_default_port() {
        let config = Config::default();
        assert_eq!(config.endpoint(), EndpointOptions::port(DEFAULT_PORT));
        assert_eq!(config.origin, DEFAULT_ORIGIN);
    }

    #[test]
    fn test_url_wins_over_port() {
        let config = Config {
            url: Some("http://sync.local:1234".to_string()),
            port: Some(5),
            origin: default_origin(),
        };
        assert_eq!(config.endpoint(), EndpointOptions::url("http://sync.local:1234"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("RTDS_PORT", "2999"), ("RTDS_ORIGIN", "http://10.0.0.2")]
            .into_iter()
            .collect();
        let mut config = Config {
            url: Some("http://old".to_string()),
            ..Config::default()
        };
        config.apply_overrides(|name| vars.get(name).map(ToString::to_string));
        assert_eq!(config.endpoint(), EndpointOptions::port(2999));
        assert_eq!(config.origin, "http://10.0.0.2");
    }

    #[test]
    fn test_invalid_port_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|name| (name == "RTDS_PORT").then(|| "nope".to_string()));
        assert_eq!(config.port, None);
    }

    #[test]
    fn test_missing_fields_deserialize() {
        let config: Config = serde_json::from_str(r#"{"port": 4000}"#).unwrap();
        assert_eq!(config.port, Some(4000));
        assert_eq!(config.origin, DEFAULT_ORIGIN);
    }
}

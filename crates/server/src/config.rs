//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use turbopush_shared::DEFAULT_HUB_PATH;

use crate::tempdata::DEFAULT_TEMPDATA_COOKIE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {message}")]
    Invalid {
        var: &'static str,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Root directory views are loaded from.
    pub views_dir: PathBuf,
    /// Path the hub websocket endpoint is mounted on.
    pub hub_path: String,
    /// Cookie the temp data provider reads.
    pub tempdata_cookie: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            views_dir: PathBuf::from("./views"),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            tempdata_cookie: DEFAULT_TEMPDATA_COOKIE.to_string(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// Environment variables:
    /// - `TURBOPUSH_BIND_ADDR` (default: "0.0.0.0:8080")
    /// - `TURBOPUSH_VIEWS_DIR` (default: "./views")
    /// - `TURBOPUSH_HUB_PATH` (default: "/hubs/turbo-stream")
    /// - `TURBOPUSH_TEMPDATA_COOKIE` (default: "turbopush.tempdata")
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("TURBOPUSH_BIND_ADDR") {
            config.bind_addr = value.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    var: "TURBOPUSH_BIND_ADDR",
                    value: value.clone(),
                    message: e.to_string(),
                }
            })?;
        }

        if let Some(value) = lookup("TURBOPUSH_VIEWS_DIR") {
            config.views_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup("TURBOPUSH_HUB_PATH") {
            if !value.starts_with('/') {
                return Err(ConfigError::Invalid {
                    var: "TURBOPUSH_HUB_PATH",
                    value,
                    message: "path must start with '/'".to_string(),
                });
            }
            config.hub_path = value;
        }

        if let Some(value) = lookup("TURBOPUSH_TEMPDATA_COOKIE") {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    var: "TURBOPUSH_TEMPDATA_COOKIE",
                    value,
                    message: "cookie name must not be empty".to_string(),
                });
            }
            config.tempdata_cookie = value;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.hub_path, "/hubs/turbo-stream");
    }

    #[test]
    fn overrides_are_read() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("TURBOPUSH_BIND_ADDR", "127.0.0.1:9000"),
            ("TURBOPUSH_VIEWS_DIR", "/srv/views"),
            ("TURBOPUSH_HUB_PATH", "/hubs/feed"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.views_dir, PathBuf::from("/srv/views"));
        assert_eq!(config.hub_path, "/hubs/feed");
    }

    #[test]
    fn bad_bind_address_fails() {
        let err = ServerConfig::from_lookup(lookup(&[("TURBOPUSH_BIND_ADDR", "nope")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "TURBOPUSH_BIND_ADDR", .. }
        ));
    }

    #[test]
    fn relative_hub_path_fails() {
        assert!(ServerConfig::from_lookup(lookup(&[("TURBOPUSH_HUB_PATH", "hubs")])).is_err());
    }
}

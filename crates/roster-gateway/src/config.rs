//! Service configuration.
//!
//! Built-in defaults, optionally overlaid by a TOML file, then by `ROSTER_*`
//! environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::gateway::ServerSettings;

pub const ENV_PREFIX: &str = "ROSTER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidOverride { key: String, value: String },
    #[error("invalid listen address {0}")]
    Address(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// HS256 signing secret. Empty means an ephemeral per-process secret.
    pub secret_key: String,
    /// PostgreSQL URL. Empty means the in-memory user store.
    pub database_url: String,
    /// Token lifetime; `0` disables expiry.
    pub token_ttl_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8888,
            secret_key: String::new(),
            database_url: String::new(),
            token_ttl_secs: 24 * 60 * 60,
            read_timeout_secs: 15,
            write_timeout_secs: 15,
            idle_timeout_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(toml::from_str(input)?)
    }

    /// Load from `path` (if given) and apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&input)?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay `ROSTER_*` values obtained through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, v)) = var("HOST") {
            self.host = v;
        }
        if let Some((key, v)) = var("PORT") {
            self.port = parse_number(key, v)?;
        }
        if let Some((_, v)) = var("SECRET_KEY") {
            self.secret_key = v;
        }
        if let Some((_, v)) = var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some((key, v)) = var("TOKEN_TTL_SECS") {
            self.token_ttl_secs = parse_number(key, v)?;
        }
        Ok(self)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::Address(addr))
    }

    pub fn token_ttl(&self) -> Option<Duration> {
        (self.token_ttl_secs > 0).then(|| Duration::from_secs(self.token_ttl_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn server_settings(&self) -> Result<ServerSettings, ConfigError> {
        Ok(ServerSettings {
            addr: self.listen_addr()?,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: String, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.listen_addr().unwrap(), "127.0.0.1:8888".parse().unwrap());
        assert_eq!(cfg.token_ttl(), Some(Duration::from_secs(86_400)));
        let server = cfg.server_settings().unwrap();
        assert_eq!(server.read_timeout, Duration::from_secs(15));
        assert_eq!(server.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn parse_partial_toml() {
        let cfg = Config::from_toml_str(
            r#"
            port = 9000
            secret_key = "s3cret"
            token_ttl_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.secret_key, "s3cret");
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.token_ttl(), None);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(Config::from_toml_str("  \n").unwrap(), Config::default());
    }

    #[test]
    fn bad_toml_is_rejected() {
        assert!(matches!(
            Config::from_toml_str("port = \"eighty\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_win() {
        let cfg = Config::default()
            .apply_env(env(&[
                ("ROSTER_HOST", "0.0.0.0"),
                ("ROSTER_PORT", "3000"),
                ("ROSTER_SECRET_KEY", "from-env"),
                ("ROSTER_TOKEN_TTL_SECS", "60"),
            ]))
            .unwrap();
        assert_eq!(cfg.listen_addr().unwrap(), "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.secret_key, "from-env");
        assert_eq!(cfg.token_ttl(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let err = Config::default()
            .apply_env(env(&[("ROSTER_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { ref key, .. } if key == "ROSTER_PORT"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            Config::load(Some(Path::new("/nonexistent/roster.toml"))),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn bad_host_is_an_error() {
        let cfg = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(matches!(cfg.listen_addr(), Err(ConfigError::Address(_))));
    }
}

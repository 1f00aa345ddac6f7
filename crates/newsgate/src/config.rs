//! Server configuration: defaults, a JSON file, then environment
//! overrides.
//!
//! ```json
//! {
//!   "bind": "0.0.0.0:8080",
//!   "secureCookies": true,
//!   "revalidationInterval": 20,
//!   "securityStampClaimType": "security_stamp",
//!   "initialJitter": 0,
//!   "signInIdleTimeout": 1209600
//! }
//! ```
//!
//! Every key is optional. Environment variables win over the file:
//!
//! | variable | field |
//! |---|---|
//! | `NEWSGATE_BIND` | `bind` |
//! | `NEWSGATE_REVALIDATION_INTERVAL_SECS` | `revalidationInterval` |
//! | `NEWSGATE_SECURE_COOKIES` | `secureCookies` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use newsgate_session::RevalidationConfig;
use serde::{Deserialize, Serialize};

pub const ENV_BIND: &str = "NEWSGATE_BIND";
pub const ENV_REVALIDATION_INTERVAL: &str = "NEWSGATE_REVALIDATION_INTERVAL_SECS";
pub const ENV_SECURE_COOKIES: &str = "NEWSGATE_SECURE_COOKIES";

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Everything the host needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,

    /// Add `Secure` to every cookie. Turn on behind TLS.
    pub secure_cookies: bool,

    #[serde(flatten)]
    pub revalidation: RevalidationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            secure_cookies: false,
            revalidation: RevalidationConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on malformed JSON or bad values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    /// [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Applies the process environment.
    ///
    /// # Errors
    /// [`ConfigError::InvalidEnv`] for an unparsable value.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup` (a stand-in for the environment).
    ///
    /// # Errors
    /// [`ConfigError::InvalidEnv`] for an unparsable value.
    pub fn with_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(bind) = lookup(ENV_BIND) {
            self.bind = bind;
        }

        if let Some(raw) = lookup(ENV_REVALIDATION_INTERVAL) {
            let secs: f64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_REVALIDATION_INTERVAL,
                value: raw.clone(),
            })?;
            self.revalidation.revalidation_interval =
                Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_REVALIDATION_INTERVAL,
                    value: raw.clone(),
                })?;
        }

        if let Some(raw) = lookup(ENV_SECURE_COOKIES) {
            self.secure_cookies = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: ENV_SECURE_COOKIES,
                        value: raw,
                    });
                }
            };
        }

        Ok(self)
    }

    /// Clamps sub-configs (zero interval → default).
    pub fn validated(mut self) -> Self {
        self.revalidation = self.revalidation.validated();
        self
    }
}

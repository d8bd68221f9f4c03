//! `~/.tally/config.toml` loading.
//!
//! Every section and key is optional; a missing file is the same as an empty
//! one. String values support `${VAR}` expansion.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Backend used when neither the config file nor the environment names one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Environment variable that overrides `server.base_url`.
pub const BASE_URL_ENV: &str = "TALLY_API_URL";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    /// Whole-request timeout. `0` disables it.
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub https_only: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where the signed-in session is persisted. `~/` is expanded.
    pub path: Option<String>,
    /// Forget any persisted session at startup.
    pub clear_on_start: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid server URL '{value}': {source}")]
    InvalidUrl {
        value: String,
        source: url::ParseError,
    },
}

impl TallyConfig {
    /// Load `~/.tally/config.toml`, or defaults when it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

impl ServerConfig {
    /// The backend origin: `TALLY_API_URL`, then `base_url`, then the default.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        self.base_url_with(env::var(BASE_URL_ENV).ok())
    }

    fn base_url_with(&self, env_override: Option<String>) -> Result<Url, ConfigError> {
        let value = env_override
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.base_url.as_deref().map(expand_env_vars))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let value = value.trim().to_string();
        Url::parse(&value).map_err(|source| ConfigError::InvalidUrl { value, source })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }
}

impl SessionConfig {
    /// Resolved session file location, if a home directory is known.
    #[must_use]
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path.as_deref() {
            Some(raw) => expand_home(&expand_env_vars(raw)),
            None => tally_dir().map(|dir| dir.join("session.json")),
        }
    }
}

fn expand_home(raw: &str) -> Option<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(raw)),
    }
}

/// Replace every `${VAR}` with the variable's value (empty when unset).
///
/// An unclosed `${` or an empty name is left as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(0) => {
                out.push_str("${}");
                rest = &after[1..];
            }
            Some(end) => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// `~/.tally`, where config, session, and logs live.
#[must_use]
pub fn tally_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tally"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    tally_dir().map(|dir| dir.join("config.toml"))
}

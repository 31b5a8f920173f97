use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{CoreResult, StreamError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds. None = unbounded; long-lived
    /// streams are bounded by the caller through the cancel handle instead.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientCfg {
    /// Base URL of the chat API, e.g. `https://chat.example.com/api`.
    pub base_url: String,
    /// Name of the environment variable that contains the bearer credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// HTTP client configuration. Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl ClientCfg {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key_env: None,
            user_agent: None,
            http: HttpCfg::default(),
        }
    }

    /// Load a config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(StreamError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| StreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| StreamError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into())))?,
        };
        Ok(cfg)
    }

    /// Resolve the bearer credential from the configured env var.
    /// No env var configured → `Ok(None)`; configured but unset → validation error.
    pub fn credential(&self) -> CoreResult<Option<SecretString>> {
        let Some(var) = &self.api_key_env else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(Some(SecretString::from(v))),
            _ => Err(StreamError::Validation(format!(
                "credential env var '{var}' is not set"
            ))),
        }
    }
}

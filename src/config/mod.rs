//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Builder pattern (see [`crate::RollcallClientBuilder`])
//! - JSON loading
//! - Granular configuration options

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::portal::core::PaddingPolicy;
use crate::portal::detectors::MarkerSet;

pub const DEFAULT_BASE_URL: &str = "https://elearning.nkust.edu.tw";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Everything a [`crate::RollcallClient`] needs to know about the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollcallConfig {
    /// Portal origin; the rollcall path is appended to it.
    pub base_url: String,
    /// Upper bound for each individual network call.
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub padding: PaddingPolicy,
    pub user_agent: String,
    /// How many `Refresh` hops are followed after the login POST.
    pub max_refresh_hops: usize,
    pub markers: MarkerSet,
}

impl Default for RollcallConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
            padding: PaddingPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_refresh_hops: 3,
            markers: MarkerSet::default(),
        }
    }
}

impl RollcallConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: RollcallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("request_timeout_ms"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("connect_timeout_ms"));
        }
        Ok(())
    }

    /// Parsed base URL; must be absolute http(s).
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };

        let url = Url::parse(&self.base_url).map_err(|err| invalid(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

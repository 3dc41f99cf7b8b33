//! Configuration and session file locations

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::routes::RouteRule;

const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// Upper bound for `session_flag_ttl_secs` (ten years)
const MAX_SESSION_FLAG_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Environment variable that overrides `api_base_url`
const API_URL_ENV: &str = "LCJ_API_URL";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the API gateway, without trailing slash
    pub api_base_url: String,
    /// Per-dispatch timeout (initial call, refresh and retry each get one)
    pub timeout_secs: u64,
    /// Login endpoint, relative to the base URL
    pub login_path: String,
    /// Token refresh endpoint, relative to the base URL
    pub refresh_path: String,
    /// Profile endpoint used by `whoami`
    pub profile_path: String,
    /// Latency samples kept per endpoint
    pub history_size: usize,
    /// Lifetime of the logged-in session flag
    pub session_flag_ttl_secs: u64,
    /// Path rewrite rules applied to every request
    pub routes: Vec<RouteRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            timeout_secs: 30,
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            profile_path: "/users/me".to_string(),
            history_size: 10,
            session_flag_ttl_secs: 24 * 60 * 60,
            routes: Vec::new(),
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "lifechangingjourney", "lcj")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Path of the persisted session (credentials + logged-in flag)
    pub fn session_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("session.toml"))
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        if let Ok(base) = std::env::var(API_URL_ENV) {
            tracing::debug!("{} overrides api_base_url", API_URL_ENV);
            config.api_base_url = base;
        }

        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    fn validate(&mut self) -> Result<()> {
        url::Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url: {}", self.api_base_url))?;
        self.api_base_url = self.api_base_url.trim_end_matches('/').to_string();
        if self.history_size == 0 {
            self.history_size = 1;
        }
        if self.session_flag_ttl_secs > MAX_SESSION_FLAG_TTL_SECS {
            tracing::warn!(
                "session_flag_ttl_secs {} too large, using {}",
                self.session_flag_ttl_secs,
                MAX_SESSION_FLAG_TTL_SECS
            );
            self.session_flag_ttl_secs = MAX_SESSION_FLAG_TTL_SECS;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn session_flag_ttl(&self) -> Duration {
        Duration::from_secs(self.session_flag_ttl_secs)
    }
}

//! Runtime configuration with TOML and environment variable support.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::cooldown::CooldownPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Base URL of the GraphQL API.
    pub api_base: String,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Entries requested per page.
    pub page_size: u32,

    /// Hard upper bound on pages fetched per list, cursor loops included.
    pub max_pages: u32,

    /// Cooldown after HTTP 429 (seconds).
    pub cooldown_rate_limited_secs: u64,

    /// Cooldown after HTTP 5xx (seconds).
    pub cooldown_server_error_secs: u64,

    /// Cooldown after other HTTP 4xx (seconds).
    pub cooldown_bad_request_secs: u64,

    /// Cooldown after a request that never reached the server (seconds).
    pub cooldown_network_error_secs: u64,

    /// Debounce window collapsing bursts of refresh triggers (milliseconds).
    pub refresh_debounce_ms: u64,

    /// Retry attempts for elements whose handle is not yet extractable.
    pub pending_retry_limit: u32,

    /// Delay between pending-element retries (milliseconds).
    pub pending_retry_delay_ms: u64,

    /// Coalescing window for scheduled rescans (milliseconds).
    pub rescan_flush_ms: u64,

    /// Delay before the follow-up rescan after a timeline response
    /// (milliseconds), long enough for the new entries to render.
    pub timeline_settle_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            api_base: "https://x.com/i/api/graphql".to_string(),
            request_timeout_secs: 30,
            page_size: 200,
            max_pages: 50,
            cooldown_rate_limited_secs: 30 * 60,
            cooldown_server_error_secs: 5 * 60,
            cooldown_bad_request_secs: 60 * 60,
            cooldown_network_error_secs: 2 * 60,
            refresh_debounce_ms: 500,
            pending_retry_limit: 5,
            pending_retry_delay_ms: 500,
            rescan_flush_ms: 16,
            timeline_settle_ms: 250,
        }
    }
}

impl FilterConfig {
    /// Load configuration from a TOML file. Missing keys fall back to
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: FilterConfig =
            toml::from_str(&contents).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of the current values.
    pub fn from_env(&mut self) -> Result<()> {
        if let Ok(base) = std::env::var("BMSF_API_BASE") {
            self.api_base = base;
        }

        if let Ok(timeout) = std::env::var("BMSF_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = timeout
                .parse()
                .map_err(|e| anyhow!("Invalid BMSF_REQUEST_TIMEOUT_SECS: {}", e))?;
        }

        if let Ok(size) = std::env::var("BMSF_PAGE_SIZE") {
            self.page_size = size
                .parse()
                .map_err(|e| anyhow!("Invalid BMSF_PAGE_SIZE: {}", e))?;
        }

        if let Ok(pages) = std::env::var("BMSF_MAX_PAGES") {
            self.max_pages = pages
                .parse()
                .map_err(|e| anyhow!("Invalid BMSF_MAX_PAGES: {}", e))?;
        }

        if let Ok(debounce) = std::env::var("BMSF_REFRESH_DEBOUNCE_MS") {
            self.refresh_debounce_ms = debounce
                .parse()
                .map_err(|e| anyhow!("Invalid BMSF_REFRESH_DEBOUNCE_MS: {}", e))?;
        }

        self.validate()?;
        Ok(())
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.api_base.is_empty() || !self.api_base.starts_with("http") {
            return Err(anyhow!("api_base must be an http(s) URL"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.page_size == 0 {
            return Err(anyhow!("page_size must be > 0"));
        }
        if self.max_pages == 0 {
            return Err(anyhow!("max_pages must be > 0"));
        }
        if self.refresh_debounce_ms == 0 {
            return Err(anyhow!("refresh_debounce_ms must be > 0"));
        }
        if self.rescan_flush_ms == 0 {
            return Err(anyhow!("rescan_flush_ms must be > 0"));
        }
        Ok(())
    }

    /// Create configuration from defaults with environment overrides.
    pub fn with_env_overrides() -> Result<Self> {
        let mut config = Self::default();
        config.from_env()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            rate_limited: Duration::from_secs(self.cooldown_rate_limited_secs),
            server_error: Duration::from_secs(self.cooldown_server_error_secs),
            bad_request: Duration::from_secs(self.cooldown_bad_request_secs),
            network_error: Duration::from_secs(self.cooldown_network_error_secs),
        }
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn pending_retry_delay(&self) -> Duration {
        Duration::from_millis(self.pending_retry_delay_ms)
    }

    pub fn rescan_flush(&self) -> Duration {
        Duration::from_millis(self.rescan_flush_ms)
    }

    pub fn timeline_settle(&self) -> Duration {
        Duration::from_millis(self.timeline_settle_ms)
    }
}

//! Configuration for the sync client.
//!
//! Loaded from a TOML file (every key optional), then overridden by
//! `LEXSYNC_*` environment variables, then validated.
//!
//! ```toml
//! api_url = "http://localhost:8000"
//! # ws_url defaults to api_url with the http scheme replaced by ws
//!
//! [loader]
//! timeout_ms = 5000
//! max_retries = 3
//! backoff_base_ms = 1000
//! # transport-level bound per HTTP request, at least twice timeout_ms
//! # request_timeout_ms = 30000
//!
//! [channel]
//! max_reconnect_attempts = 5
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//!
//! [poller]
//! interval_ms = 10000
//!
//! [drafts]
//! debounce_ms = 2000
//! ttl_hours = 24
//! dir = "/var/lib/lexsync/drafts"
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::app::drafts::{DEFAULT_INVALIDATE_KEYS, DraftPolicy};
use crate::app::loader::LoadPolicy;
use crate::app::retry::RetryPolicy;

pub const ENV_API_URL: &str = "LEXSYNC_API_URL";
pub const ENV_WS_URL: &str = "LEXSYNC_WS_URL";
pub const ENV_LOADER_TIMEOUT_MS: &str = "LEXSYNC_LOADER_TIMEOUT_MS";
pub const ENV_LOADER_MAX_RETRIES: &str = "LEXSYNC_LOADER_MAX_RETRIES";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "LEXSYNC_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "LEXSYNC_MAX_RECONNECT_ATTEMPTS";
pub const ENV_POLL_INTERVAL_MS: &str = "LEXSYNC_POLL_INTERVAL_MS";
pub const ENV_DRAFTS_DIR: &str = "LEXSYNC_DRAFTS_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// HTTP request timeout. Unset means requests are only bounded by
    /// cancellation, so a response arriving after `timeout_ms` can still commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_retries: 3,
            backoff_base_ms: 1000,
            request_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub max_reconnect_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftsConfig {
    pub debounce_ms: u64,
    pub ttl_hours: i64,
    /// File-backed draft store location. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Cache keys removed when a draft is cleared after a create.
    pub invalidate_keys: Vec<String>,
}

impl Default for DraftsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            ttl_hours: 24,
            dir: None,
            invalidate_keys: DEFAULT_INVALIDATE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    pub loader: LoaderConfig,
    pub channel: ChannelConfig,
    pub poller: PollerConfig,
    pub drafts: DraftsConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            ws_url: None,
            loader: LoaderConfig::default(),
            channel: ChannelConfig::default(),
            poller: PollerConfig::default(),
            drafts: DraftsConfig::default(),
        }
    }
}

impl SyncConfig {
    /// File (when given) → environment overrides → validation.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Loading sync config from: {}", path.display());
                Self::from_file(path)?
            }
            None => {
                debug!("No config file given, using defaults");
                Self::default()
            }
        };
        config.apply_env(|var| env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file without applying the environment or validating.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `LEXSYNC_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL) {
            self.ws_url = Some(url);
        }
        if let Some(dir) = lookup(ENV_DRAFTS_DIR) {
            self.drafts.dir = Some(PathBuf::from(dir));
        }
        override_parsed(&lookup, ENV_LOADER_TIMEOUT_MS, &mut self.loader.timeout_ms)?;
        override_parsed(&lookup, ENV_LOADER_MAX_RETRIES, &mut self.loader.max_retries)?;
        if lookup(ENV_REQUEST_TIMEOUT_MS).is_some() {
            let mut ms = 0u64;
            override_parsed(&lookup, ENV_REQUEST_TIMEOUT_MS, &mut ms)?;
            self.loader.request_timeout_ms = Some(ms);
        }
        override_parsed(
            &lookup,
            ENV_MAX_RECONNECT_ATTEMPTS,
            &mut self.channel.max_reconnect_attempts,
        )?;
        override_parsed(&lookup, ENV_POLL_INTERVAL_MS, &mut self.poller.interval_ms)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "api_url must be an http(s) URL, got {}",
                self.api_url
            )));
        }
        if let Some(ws_url) = &self.ws_url
            && !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://"))
        {
            return Err(ConfigError::Validation(format!(
                "ws_url must be a ws(s) URL, got {ws_url}"
            )));
        }
        let positive = [
            ("loader.timeout_ms", self.loader.timeout_ms),
            ("loader.max_retries", u64::from(self.loader.max_retries)),
            ("loader.backoff_base_ms", self.loader.backoff_base_ms),
            ("channel.base_delay_ms", self.channel.base_delay_ms),
            ("channel.max_delay_ms", self.channel.max_delay_ms),
            ("poller.interval_ms", self.poller.interval_ms),
            ("drafts.debounce_ms", self.drafts.debounce_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Validation(format!("{name} must be greater than 0")));
        }
        if let Some(request_ms) = self.loader.request_timeout_ms
            && request_ms < self.loader.timeout_ms.saturating_mul(2)
        {
            return Err(ConfigError::Validation(format!(
                "loader.request_timeout_ms ({request_ms}) must be at least twice loader.timeout_ms ({}) so late responses can still arrive",
                self.loader.timeout_ms
            )));
        }
        if self.drafts.ttl_hours <= 0 {
            return Err(ConfigError::Validation(
                "drafts.ttl_hours must be greater than 0".to_string(),
            ));
        }
        if self.channel.max_delay_ms < self.channel.base_delay_ms {
            return Err(ConfigError::Validation(
                "channel.max_delay_ms must not be below channel.base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Explicit `ws_url`, else `api_url` with `http` replaced by `ws`.
    pub fn ws_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        match self.api_url.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => self.api_url.clone(),
        }
    }

    pub fn load_policy(&self) -> LoadPolicy {
        LoadPolicy {
            timeout: Duration::from_millis(self.loader.timeout_ms),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(self.loader.backoff_base_ms),
                multiplier: 2.0,
                max_delay: None,
                max_attempts: self.loader.max_retries,
            },
        }
    }

    /// Transport-level bound for each HTTP request, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.loader.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.channel.base_delay_ms),
            multiplier: 2.0,
            max_delay: Some(Duration::from_millis(self.channel.max_delay_ms)),
            max_attempts: self.channel.max_reconnect_attempts,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poller.interval_ms)
    }

    pub fn draft_policy(&self) -> DraftPolicy {
        DraftPolicy {
            debounce: Duration::from_millis(self.drafts.debounce_ms),
            ttl: chrono::Duration::hours(self.drafts.ttl_hours),
            invalidate_keys: self.drafts.invalidate_keys.clone(),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, var: &'static str, target: &mut T) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(var) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw })?;
    }
    Ok(())
}

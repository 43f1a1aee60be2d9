//! Configuration loading.
//!
//! Non-secret tunables come from an optional TOML file; every field has a
//! default so the bot runs with no file at all. Secrets (API keys) are read
//! once from the environment into [`Credentials`] and passed explicitly to
//! the clients that need them.

use anyhow::{bail, Context, Result};
use secrecy::{Secret, SecretString};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::types::ArmaOrder;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "ARMA_BOT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const ALPHAVANTAGE_API_KEY: &str = "ALPHAVANTAGE_API_KEY";
pub const CONSUMER_KEY: &str = "CONSUMER_KEY";
pub const CONSUMER_SECRET: &str = "CONSUMER_SECRET";
pub const ACCESS_KEY: &str = "ACCESS_KEY";
pub const ACCESS_SECRET: &str = "ACCESS_SECRET";

/// Largest AR or MA lag accepted from configuration.
pub const MAX_LAG: usize = 20;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub source: SourceConfig,
    pub model: ModelConfig,
    pub schedule: ScheduleConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    /// Ticker that is fetched and named in the published message.
    pub symbol: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "ARMA-BOT".to_string(),
            symbol: "VXX".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub interval: String,
    pub output_size: String,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            interval: "1min".to_string(),
            output_size: "full".to_string(),
            timeout_secs: 30,
        }
    }
}

/// How the ARMA order is chosen on each fit.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderSelection {
    /// Always use `ModelConfig::order`.
    #[default]
    Fixed,
    /// Minimum-BIC search over `0..=max_ar` x `0..=max_ma`.
    Bic,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub selection: OrderSelection,
    pub order: ArmaOrder,
    pub max_ar: usize,
    pub max_ma: usize,
    /// Two-sided confidence interval coverage.
    pub confidence: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            selection: OrderSelection::Fixed,
            order: ArmaOrder::DEFAULT,
            max_ar: 4,
            max_ma: 2,
            confidence: 0.95,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds past the minute boundary for the first tick.
    pub tick_offset_secs: u32,
    /// Sleep between cycles after the first.
    pub interval_secs: u64,
    /// Offset added to "now" for the display target time (3h05m).
    pub forecast_offset_mins: i64,
    pub cycle_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_offset_secs: 1,
            interval_secs: 60,
            forecast_offset_mins: 185,
            cycle_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PublisherConfig {
    /// Log messages instead of posting them.
    pub dry_run: bool,
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults if
    /// the file does not exist.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!(path, "No config file found, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Path from `ARMA_BOT_CONFIG`, or `config.toml`.
    pub fn default_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot.symbol.trim().is_empty() {
            bail!("bot.symbol must not be empty");
        }
        if !(self.model.confidence > 0.0 && self.model.confidence < 1.0) {
            bail!(
                "model.confidence must be in (0, 1), got {}",
                self.model.confidence
            );
        }
        let model = &self.model;
        for (field, lag) in [
            ("model.order.p", model.order.p),
            ("model.order.q", model.order.q),
            ("model.max_ar", model.max_ar),
            ("model.max_ma", model.max_ma),
        ] {
            if lag > MAX_LAG {
                bail!("{field} must be at most {MAX_LAG}, got {lag}");
            }
        }
        if self.schedule.tick_offset_secs >= 60 {
            bail!("schedule.tick_offset_secs must be below 60");
        }
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be positive");
        }
        if self.schedule.cycle_timeout_secs == 0 {
            bail!("schedule.cycle_timeout_secs must be positive");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// API secrets, read once at startup.
pub struct Credentials {
    pub alphavantage_api_key: SecretString,
    pub twitter: TwitterCredentials,
}

/// OAuth 1.0a user-context credentials.
pub struct TwitterCredentials {
    pub consumer_key: SecretString,
    pub consumer_secret: SecretString,
    pub access_key: SecretString,
    pub access_secret: SecretString,
}

impl Credentials {
    /// Read all secrets from the process environment. Any missing
    /// variable is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read all secrets through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| -> Result<SecretString> {
            match lookup(name) {
                Some(value) if !value.is_empty() => Ok(Secret::new(value)),
                _ => bail!("Environment variable not set: {name}"),
            }
        };

        Ok(Self {
            alphavantage_api_key: require(ALPHAVANTAGE_API_KEY)?,
            twitter: TwitterCredentials {
                consumer_key: require(CONSUMER_KEY)?,
                consumer_secret: require(CONSUMER_SECRET)?,
                access_key: require(ACCESS_KEY)?,
                access_secret: require(ACCESS_SECRET)?,
            },
        })
    }
}

//! Runtime settings, built once at startup and passed down by reference.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::db::RetryPolicy;

const CONFIG_FILE: &str = "rx_extractor";
const ENV_PREFIX: &str = "RX";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub extraction: ExtractionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub busy_timeout_ms: u64,
}

#[derive(Clone, Deserialize)]
pub struct ExtractionSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Settings {
    /// Defaults, then `rx_extractor.{toml,json,...}` if present, then
    /// `RX_<SECTION>__<KEY>` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let built = defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let mut settings: Settings = built.try_deserialize()?;
        if settings.extraction.api_key.is_none() {
            settings.extraction.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        Ok(settings)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("database.path", "data/prescriptions.sqlite")?
        .set_default("database.max_attempts", 5_i64)?
        .set_default("database.base_delay_ms", 2000_i64)?
        .set_default("database.busy_timeout_ms", 5000_i64)?
        .set_default("extraction.base_url", "https://api.openai.com/v1")?
        .set_default("extraction.model", "gpt-4o")?
        .set_default("extraction.timeout_secs", 120_i64)
}

impl DatabaseSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl fmt::Debug for ExtractionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

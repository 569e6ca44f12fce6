//! # configs
//!
//! Layered settings for the post store: built-in defaults, then an optional
//! `config/default.toml`, then `FORUM__`-prefixed environment variables
//! (`FORUM__DATABASE__URL`, `FORUM__LOGGING__JSON`, ...). A `.env` file is
//! loaded into the environment first when present.

use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

pub use secrecy::ExposeSecret;

const ENV_PREFIX: &str = "FORUM";
const DEFAULT_FILE: &str = "config/default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// Connection string, e.g. `sqlite:forum.db` or `sqlite::memory:`
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisibilitySettings {
    /// Privacy assumed for a post no classifier votes on
    pub private_by_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub visibility: VisibilitySettings,
}

impl Settings {
    /// Reads `.env`, the optional settings file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let builder = Self::defaults()?
            .add_source(File::with_name(DEFAULT_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        let settings = Self::build(builder)?;
        tracing::debug!(
            max_connections = settings.database.max_connections,
            json_logs = settings.logging.json,
            private_by_default = settings.visibility.private_by_default,
            "settings loaded"
        );
        Ok(settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("database.url", "sqlite:forum.db")?
            .set_default("database.max_connections", 5)?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", false)?
            .set_default("visibility.private_by_default", false)?)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "database.max_connections",
                reason: "must be at least 1".into(),
            });
        }
        if self.database.url.expose_secret().trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "database.url",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Seconds between liveness sweeps.
    pub heartbeat_interval_secs: u64,
    /// How many recent messages a joining client receives.
    pub history_limit: u32,
    /// Messages older than this many days are eligible for cleanup.
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chat: ChatConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default values
            .set_default("environment", "development")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9090)?
            .set_default("database.url", "sqlite://chat.db")?
            .set_default("database.max_connections", 5)?
            .set_default("chat.heartbeat_interval_secs", 30)?
            .set_default("chat.history_limit", 50)?
            .set_default("chat.retention_days", 30)?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in settings from environment variables (with prefix "APP_")
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`.
            // The prefix separator stays a single underscore; `separator`
            // alone would demand the `APP__` form.
            .add_source(
                Environment::with_prefix("app")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    #[cfg(test)]
    pub fn new_for_test() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("environment", "test")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 9090)?
            .set_default("database.url", "sqlite::memory:")?
            .set_default("database.max_connections", 1)?
            .set_default("chat.heartbeat_interval_secs", 30)?
            .set_default("chat.history_limit", 50)?
            .set_default("chat.retention_days", 30)?
            .build()?
            .try_deserialize()
    }
}

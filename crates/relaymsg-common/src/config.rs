//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults.

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call relaymsg_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        .set_default("server.bind_addr", "0.0.0.0:7900")?
        .set_default("broker.node_id", 0)?
        .set_default("broker.mode", "normal")?
        .set_default("broker.preemption_grace_secs", 4)?
        .set_default("broker.read_timeout_secs", 120)?
        .set_default("broker.channel_queue_capacity", 256)?
        .set_default("webhook.enabled", false)?
        .set_default("webhook.url", "")?
        .set_default("webhook.timeout_ms", 3_000)?
        .set_default("database.url", "postgres://localhost/relaymsg")?
        .set_default("database.max_connections", 20)?
        .set_default("database.min_connections", 2)?
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("RELAYMSG")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Install a configuration directly — used by tests that can't rely on
/// environment variables or `config.toml`.
pub fn init_for_test(cfg: AppConfig) -> &'static AppConfig {
    CONFIG.get_or_init(|| cfg)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub webhook: WebhookConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// TCP address the broker listens on, e.g. "0.0.0.0:7900".
    pub bind_addr: String,
}

/// Runtime mode. In `Test` mode, token verification and ACL checks are
/// skipped and `DeviceLevel::Master` is assumed for every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Normal,
    Test,
}

impl Mode {
    pub fn is_test_mode(self) -> bool {
        self == Mode::Test
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    /// Snowflake node id; must be unique per process in a cluster.
    pub node_id: u16,
    pub mode: Mode,
    /// Seconds to wait after writing a preemption DISCONNECT before closing
    /// the old socket.
    pub preemption_grace_secs: u64,
    /// Per-connection idle read deadline.
    pub read_timeout_secs: u64,
    /// Bounded inbound queue capacity for each channel's delivery worker.
    pub channel_queue_capacity: usize,
}

impl BrokerConfig {
    pub fn is_test_mode(&self) -> bool {
        self.mode == Mode::Test
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

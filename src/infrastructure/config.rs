use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub encryption_key: String,
    pub exchange_api_url: String,
    /// Default exchange credential; a run's settings may override it.
    pub exchange_api_token: Option<String>,
    pub session_broker_url: String,
    pub challenge_timeout_secs: u64,
    pub server_host: String,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("SWARM"))
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("exchange_api_url", "https://rep4rep.com/pub-api")?
            .set_default("session_broker_url", "http://127.0.0.1:8090")?
            .set_default("challenge_timeout_secs", 120)?
            .build()?;

        config.try_deserialize()
    }
}

//! Layered server configuration: defaults, then an optional config
//! file, then `VAULT_SERVER_*` environment overrides.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub worker_threads: usize,
}

impl ServerConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .set_default("bind_addr", "0.0.0.0:8787")?
            .set_default("db_path", "vault-server.db")?
            .set_default("worker_threads", 4)?
            .add_source(config::File::with_name("vault-server").required(false))
            .add_source(config::Environment::with_prefix("VAULT_SERVER"))
            .build()?;
        settings.try_deserialize()
    }
}

use crate::error::AppError;
use config::{Config as Loader, Environment, File};
use serde::Deserialize;

/// Settings every service binary shares: where to listen. Service-specific
/// configuration (database, notifications) layers on top in each crate.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Layered load: an optional `configuration` file, then `APP`-prefixed
    /// environment variables (`APP_PORT=9000` overrides the file).
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let loaded = Loader::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(loaded.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_all_interfaces_on_8080() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }
}

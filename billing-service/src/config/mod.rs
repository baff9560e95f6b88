use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use service_core::config::Config as CommonConfig;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    pub common: CommonConfig,
    pub service_name: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    /// Master switch; individual operations still pass `send_sms` per call.
    pub sms_enabled: bool,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mut common = CommonConfig::load()?;
        if let Ok(port) = env::var("BILLING_SERVICE_PORT") {
            common.port = port.parse()?;
        }

        let database_url =
            env::var("BILLING_DATABASE_URL").expect("BILLING_DATABASE_URL must be set");
        let max_connections = env::var("BILLING_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("BILLING_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let sms_enabled = env::var("BILLING_SMS_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let log_level = env::var("BILLING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            common,
            service_name: "billing-service".to_string(),
            log_level,
            database: DatabaseConfig {
                url: database_url,
                max_connections,
                min_connections,
            },
            notifications: NotificationConfig { sms_enabled },
        })
    }
}

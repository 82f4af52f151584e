//! Environment-based settings.
//!
//! `DATABASE_URL` is required; the MQTT settings default to a local broker
//! for development.

use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} is not valid: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub mqtt_hostname: String,
    pub mqtt_port: u16,
    pub mqtt_identifier: String,
    pub mqtt_password: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            mqtt_hostname: env::var("MQTT_HOSTNAME").unwrap_or_else(|_| "localhost".to_owned()),
            mqtt_port: match env::var("MQTT_PORT") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| SettingsError::Invalid("MQTT_PORT", raw))?,
                Err(_) => 1883,
            },
            mqtt_identifier: env::var("MQTT_IDENTIFIER").unwrap_or_else(|_| "server".to_owned()),
            mqtt_password: env::var("MQTT_PASSWORD").unwrap_or_default(),
        })
    }
}

fn require(name: &'static str) -> Result<String, SettingsError> {
    env::var(name).map_err(|_| SettingsError::Missing(name))
}

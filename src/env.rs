use dotenv::dotenv;
use std::env;

use crate::config::BrokerConfig;
use crate::rabbitmq::errors::Result;

pub const HOST_VAR: &str = "RABBITMQ_HOST";
pub const VHOST_VAR: &str = "RABBITMQ_VHOST";
pub const USERNAME_VAR: &str = "RABBITMQ_USERNAME";
pub const PASSWORD_VAR: &str = "RABBITMQ_PASSWORD";
pub const PORT_VAR: &str = "RABBITMQ_PORT";
pub const CONNECTION_NAME_VAR: &str = "RABBITMQ_CONNECTION_NAME";

impl BrokerConfig {
    /// Reads the `RABBITMQ_*` variables, loading a `.env` file first when
    /// one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = BrokerConfig::default();

        let config = BrokerConfig {
            host: lookup(HOST_VAR).unwrap_or(defaults.host),
            virtual_host: lookup(VHOST_VAR).unwrap_or(defaults.virtual_host),
            username: lookup(USERNAME_VAR).unwrap_or(defaults.username),
            password: lookup(PASSWORD_VAR).unwrap_or(defaults.password),
            port: match lookup(PORT_VAR) {
                Some(val) => val.trim().parse()?,
                None => defaults.port,
            },
            connection_name: lookup(CONNECTION_NAME_VAR).or(defaults.connection_name),
        };

        config.validate()?;
        Ok(config)
    }
}

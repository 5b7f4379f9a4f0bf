// src/config.rs
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rabbitmq::errors::{RabbitMQError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_VIRTUAL_HOST: &str = "/";
pub const DEFAULT_USERNAME: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_PORT: u16 = 5672;

const CONFIG_FILE_NAME: &str = "rabbitmq.json";

/// Coordinates of the broker a [`ConnectionFactory`](crate::ConnectionFactory)
/// connects to.
///
/// | field          | default     |
/// |----------------|-------------|
/// | `host`         | `127.0.0.1` |
/// | `virtual_host` | `/`         |
/// | `username`     | `guest`     |
/// | `password`     | `guest`     |
/// | `port`         | `5672`      |
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    /// Reported to the broker as the `connection_name` client property.
    pub connection_name: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            virtual_host: DEFAULT_VIRTUAL_HOST.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            port: DEFAULT_PORT,
            connection_name: None,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("virtual_host", &self.virtual_host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("connection_name", &self.connection_name)
            .finish()
    }
}

impl BrokerConfig {
    pub fn new(
        host: impl Into<String>,
        virtual_host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            virtual_host: virtual_host.into(),
            username: username.into(),
            password: password.into(),
            port,
            connection_name: None,
        }
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Structured AMQP URI. The vhost and credentials are carried as-is, so
    /// no percent-encoding is involved.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.virtual_host.clone(),
            ..AMQPUri::default()
        }
    }

    /// Password-free description of the target, for logs and errors.
    pub fn endpoint(&self) -> String {
        format!(
            "amqp://{}@{}:{} (vhost '{}')",
            self.username, self.host, self.port, self.virtual_host
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RabbitMQError::ConfigError("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(RabbitMQError::ConfigError("port cannot be 0".to_string()));
        }
        if self.virtual_host.is_empty() {
            return Err(RabbitMQError::ConfigError(
                "virtual host cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Looks for `rabbitmq.json` in the working directory, then in
    /// `config/`, then `~/.rabbitmq.json`.
    pub fn find_config_file() -> Option<PathBuf> {
        let locations = [
            ("Current directory", PathBuf::from(CONFIG_FILE_NAME)),
            ("Config directory", Path::new("config").join(CONFIG_FILE_NAME)),
        ];

        for (location_name, path) in locations {
            if path.exists() {
                debug!("Found config file in {}: {}", location_name, path.display());
                return Some(path);
            }
        }

        let home_config = home::home_dir()?.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Some(home_config);
        }

        None
    }

    /// Reads a JSON document; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RabbitMQError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;

        let config: BrokerConfig =
            serde_json::from_str(&content).map_err(|source| RabbitMQError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Config file when one is found, environment otherwise.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::from_json_file(path),
            None => Self::from_env(),
        }
    }
}

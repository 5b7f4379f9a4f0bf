use lapin::{types::LongString, Connection, ConnectionProperties};
use tracing::{debug, error, info};

use super::amqp_client::AmqpConnection;
use super::errors::{RabbitMQError, Result, TransportError};
use crate::config::BrokerConfig;

/// Opens broker connections from a fixed [`BrokerConfig`].
///
/// The factory keeps no record of the connections it hands out and never
/// retries; each `connect` is a single attempt whose failure goes straight
/// back to the caller.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    config: BrokerConfig,
}

impl ConnectionFactory {
    pub fn new(config: BrokerConfig) -> Self {
        ConnectionFactory { config }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn connection_properties(&self) -> ConnectionProperties {
        let properties = ConnectionProperties::default();
        match &self.config.connection_name {
            Some(name) => properties.with_connection_name(LongString::from(name.as_str())),
            None => properties,
        }
    }

    /// Fails with [`RabbitMQError::ConnectionError`] when the broker is
    /// unreachable, rejects the credentials or does not know the virtual host.
    pub async fn connect(&self) -> Result<AmqpConnection> {
        let endpoint = self.config.endpoint();
        info!(%endpoint, "Connecting to RabbitMQ");

        match Connection::connect_uri(self.config.amqp_uri(), self.connection_properties()).await {
            Ok(connection) => {
                debug!(%endpoint, "Successfully connected to RabbitMQ");
                Ok(AmqpConnection::new(connection))
            }
            Err(err) => {
                error!(%endpoint, error = %err, "Failed to connect to RabbitMQ");
                Err(RabbitMQError::ConnectionError {
                    endpoint,
                    source: TransportError::from(err),
                })
            }
        }
    }
}

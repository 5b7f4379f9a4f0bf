use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::{RabbitMQError, Result};
use super::transport::{BrokerChannel, BrokerConnection, QueueDeclaration};

/// Queue parameters used when provisioning a channel for publishing.
///
/// Defaults: `durable = true`, `auto_delete = false`, `exclusive = false`.
/// These differ from [`ConsumerOptions`](super::consumer::ConsumerOptions),
/// whose defaults are non-durable and auto-deleting. Both sides of a shared
/// queue must agree, otherwise the second declaration is rejected by the
/// broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
            exclusive: false,
        }
    }
}

impl ChannelOptions {
    pub fn declaration(&self, queue_name: &str) -> QueueDeclaration {
        QueueDeclaration {
            name: queue_name.to_string(),
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
        }
    }
}

/// Opens a fresh channel on `connection` and declares `queue_name` on it.
///
/// Declaring is idempotent for matching parameters. A conflicting
/// declaration, or a closed connection, is a [`RabbitMQError::ChannelError`].
pub async fn open_channel<C>(
    connection: &C,
    queue_name: &str,
    options: &ChannelOptions,
) -> Result<C::Channel>
where
    C: BrokerConnection + ?Sized,
{
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| RabbitMQError::channel("failed to create channel", e))?;

    let declaration = options.declaration(queue_name);
    debug!(
        channel_id = channel.id(),
        queue = %declaration.name,
        durable = declaration.durable,
        auto_delete = declaration.auto_delete,
        exclusive = declaration.exclusive,
        "Declaring queue"
    );

    if let Err(e) = channel.queue_declare(&declaration).await {
        warn!(queue = %declaration.name, error = %e, "Queue declaration rejected");
        return Err(RabbitMQError::channel(
            format!("failed to declare queue '{}'", declaration.name),
            e,
        ));
    }

    Ok(channel)
}

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::{describe_error, RabbitMQError};
use super::transport::{BrokerChannel, DEFAULT_EXCHANGE};
use crate::response::QueueResponse;

/// Value carried by a successful [`publish`].
pub const PUBLISH_CONFIRMATION: &str = "message enqueued";

/// Longest routing key AMQP can carry (a short string).
pub const MAX_ROUTING_KEY_LEN: usize = 255;

/// Defaults to `persistent = true`: the broker writes the message to disk
/// when its queue is durable, at the cost of extra I/O per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishOptions {
    pub persistent: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self { persistent: true }
    }
}

impl PublishOptions {
    pub fn transient() -> Self {
        Self { persistent: false }
    }
}

/// Publishes `payload` to the queue named `routing_key` through the default
/// exchange.
///
/// Never fails past its own boundary: any fault is reported as
/// [`QueueResponse::Error`] carrying the fault and its causes. Publisher
/// confirms are not awaited, and every call enqueues a new message, so
/// retrying a call can produce duplicates.
pub async fn publish<C>(
    channel: &C,
    payload: &[u8],
    routing_key: &str,
    options: &PublishOptions,
) -> QueueResponse<String>
where
    C: BrokerChannel + ?Sized,
{
    match try_publish(channel, payload, routing_key, options).await {
        Ok(()) => {
            debug!(
                channel_id = channel.id(),
                routing_key,
                bytes = payload.len(),
                persistent = options.persistent,
                "Published message"
            );
            QueueResponse::success(PUBLISH_CONFIRMATION.to_string())
        }
        Err(err) => {
            let message = describe_error(&err);
            warn!(routing_key, error = %message, "Publish failed");
            QueueResponse::error(message)
        }
    }
}

async fn try_publish<C>(
    channel: &C,
    payload: &[u8],
    routing_key: &str,
    options: &PublishOptions,
) -> Result<(), RabbitMQError>
where
    C: BrokerChannel + ?Sized,
{
    if routing_key.len() > MAX_ROUTING_KEY_LEN {
        return Err(RabbitMQError::InvalidRoutingKey(format!(
            "{} bytes exceeds the {} byte limit",
            routing_key.len(),
            MAX_ROUTING_KEY_LEN
        )));
    }

    channel
        .basic_publish(DEFAULT_EXCHANGE, routing_key, payload, options.persistent)
        .await
        .map_err(|source| RabbitMQError::PublishError {
            routing_key: routing_key.to_string(),
            source,
        })
}

// src/rabbitmq/transport.rs
// Seams between the operations in this crate and the broker client.

use async_trait::async_trait;
use futures_lite::stream::Boxed;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
use mockall::automock;

use super::errors::{RabbitMQError, Result, TransportError};

/// Delivery mode marking a message for durable storage.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// The nameless exchange, which routes on queue name.
pub const DEFAULT_EXCHANGE: &str = "";

pub type DeliveryStream = Boxed<std::result::Result<Delivery, TransportError>>;

/// Parameters a queue is ensured to exist with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueDeclaration {
    /// First parameter that differs from `other`, named as the broker names
    /// queue arguments.
    pub fn inequivalent_arg(&self, other: &QueueDeclaration) -> Option<&'static str> {
        if self.durable != other.durable {
            Some("durable")
        } else if self.exclusive != other.exclusive {
            Some("exclusive")
        } else if self.auto_delete != other.auto_delete {
            Some("auto_delete")
        } else {
            None
        }
    }
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    type Channel: BrokerChannel;

    fn is_open(&self) -> bool;

    async fn create_channel(&self) -> std::result::Result<Self::Channel, TransportError>;

    async fn close(&self) -> std::result::Result<(), TransportError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn id(&self) -> u16;

    fn is_open(&self) -> bool;

    async fn queue_declare(
        &self,
        declaration: &QueueDeclaration,
    ) -> std::result::Result<(), TransportError>;

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        global: bool,
    ) -> std::result::Result<(), TransportError>;

    /// Hands the frame to the transport without waiting for a publisher
    /// confirm.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> std::result::Result<(), TransportError>;

    /// Starts a manual-acknowledgement consumer.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> std::result::Result<DeliveryStream, TransportError>;

    async fn basic_cancel(&self, consumer_tag: &str) -> std::result::Result<(), TransportError>;

    async fn close(&self) -> std::result::Result<(), TransportError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> std::result::Result<(), TransportError>;

    async fn nack(&self, requeue: bool) -> std::result::Result<(), TransportError>;

    async fn reject(&self, requeue: bool) -> std::result::Result<(), TransportError>;
}

/// A message pushed to a consumer. It stays unacknowledged on the broker
/// until one of `ack`, `nack` or `reject` succeeds.
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    pub persistent: bool,
    pub data: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        routing_key: impl Into<String>,
        redelivered: bool,
        persistent: bool,
        data: Vec<u8>,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            delivery_tag,
            routing_key: routing_key.into(),
            redelivered,
            persistent,
            data,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await.map_err(|source| self.ack_error(source))
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker
            .nack(requeue)
            .await
            .map_err(|source| self.ack_error(source))
    }

    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker
            .reject(requeue)
            .await
            .map_err(|source| self.ack_error(source))
    }

    fn ack_error(&self, source: TransportError) -> RabbitMQError {
        RabbitMQError::AckError {
            delivery_tag: self.delivery_tag,
            source,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("persistent", &self.persistent)
            .field("data", &self.data.len())
            .finish_non_exhaustive()
    }
}

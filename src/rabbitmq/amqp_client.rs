// src/rabbitmq/amqp_client.rs
// lapin-backed implementations of the transport traits.

use async_trait::async_trait;
use futures_lite::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery as LapinDelivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, BasicRejectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection,
};
use tracing::debug;

use super::errors::TransportError;
use super::transport::{
    Acknowledge, BrokerChannel, BrokerConnection, Delivery, DeliveryStream, QueueDeclaration,
    PERSISTENT_DELIVERY_MODE,
};

const REPLY_SUCCESS: u16 = 200;

/// An open lapin connection. Dropping it does not close the session; call
/// [`BrokerConnection::close`].
#[derive(Debug)]
pub struct AmqpConnection {
    inner: Connection,
}

impl AmqpConnection {
    pub fn new(inner: Connection) -> Self {
        Self { inner }
    }

    /// The raw lapin handle, for anything this crate does not wrap.
    pub fn raw(&self) -> &Connection {
        &self.inner
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    type Channel = AmqpChannel;

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn create_channel(&self) -> Result<AmqpChannel, TransportError> {
        let channel = self.inner.create_channel().await?;
        debug!(channel_id = channel.id(), "Created channel");
        Ok(AmqpChannel::new(channel))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close(REPLY_SUCCESS, "connection closed by client").await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AmqpChannel {
    inner: Channel,
}

impl AmqpChannel {
    pub fn new(inner: Channel) -> Self {
        Self { inner }
    }

    pub fn raw(&self) -> &Channel {
        &self.inner
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn id(&self) -> u16 {
        self.inner.id()
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn queue_declare(&self, declaration: &QueueDeclaration) -> Result<(), TransportError> {
        let queue = self
            .inner
            .queue_declare(
                &declaration.name,
                QueueDeclareOptions {
                    durable: declaration.durable,
                    exclusive: declaration.exclusive,
                    auto_delete: declaration.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        debug!(
            queue = %declaration.name,
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "Queue declared"
        );
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), TransportError> {
        self.inner
            .basic_qos(prefetch_count, BasicQosOptions { global })
            .await?;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> Result<(), TransportError> {
        let properties = if persistent {
            BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        } else {
            BasicProperties::default()
        };

        // The returned confirm is dropped; confirms are not awaited.
        self.inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, TransportError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer
            .map(|delivery| delivery.map(into_delivery).map_err(TransportError::from))
            .boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close(REPLY_SUCCESS, "channel closed by client").await?;
        Ok(())
    }
}

fn into_delivery(delivery: LapinDelivery) -> Delivery {
    let persistent = matches!(
        delivery.properties.delivery_mode(),
        Some(mode) if *mode == PERSISTENT_DELIVERY_MODE
    );

    let routing_key = delivery.routing_key.as_str().to_string();

    Delivery::new(
        delivery.delivery_tag,
        routing_key,
        delivery.redelivered,
        persistent,
        delivery.data,
        Box::new(LapinAcker(delivery.acker)),
    )
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledge for LapinAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        self.0.reject(BasicRejectOptions { requeue }).await?;
        Ok(())
    }
}

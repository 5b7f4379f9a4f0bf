use futures_lite::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::errors::{RabbitMQError, Result};
use super::transport::{BrokerChannel, Delivery, DeliveryStream, QueueDeclaration};

/// Unacknowledged messages a consumer may hold at once. One message at a
/// time keeps a slow consumer from hoarding work others could take.
pub const FAIR_DISPATCH_PREFETCH: u16 = 1;

/// Queue parameters used when registering a consumer.
///
/// Defaults: `durable = false`, `auto_delete = true`. Exclusivity is not
/// configurable here and is always off. These defaults differ from the
/// publish side's [`ChannelOptions`](super::channel_manager::ChannelOptions);
/// set `durable = true, auto_delete = false` to consume a queue provisioned
/// with the publish defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            durable: false,
            auto_delete: true,
        }
    }
}

impl ConsumerOptions {
    pub fn declaration(&self, queue_name: &str) -> QueueDeclaration {
        QueueDeclaration {
            name: queue_name.to_string(),
            durable: self.durable,
            exclusive: false,
            auto_delete: self.auto_delete,
        }
    }
}

/// Declares `queue_name`, limits the channel to one unacknowledged message
/// per consumer and starts a manual-ack consumer on it.
///
/// Nothing is acknowledged on the caller's behalf.
pub async fn register_consumer<C>(
    channel: &C,
    queue_name: &str,
    options: &ConsumerOptions,
) -> Result<ConsumerHandle>
where
    C: BrokerChannel + ?Sized,
{
    let declaration = options.declaration(queue_name);
    channel.queue_declare(&declaration).await.map_err(|e| {
        RabbitMQError::consumer(format!("failed to declare queue '{}'", queue_name), e)
    })?;

    channel
        .basic_qos(FAIR_DISPATCH_PREFETCH, false)
        .await
        .map_err(|e| RabbitMQError::consumer("failed to set QoS", e))?;

    let consumer_tag = format!("consumer-{}", Uuid::new_v4());
    let deliveries = channel
        .basic_consume(queue_name, &consumer_tag)
        .await
        .map_err(|e| RabbitMQError::consumer(format!("failed to consume '{}'", queue_name), e))?;

    info!(
        channel_id = channel.id(),
        queue = queue_name,
        consumer_tag = %consumer_tag,
        "Started consuming"
    );

    Ok(ConsumerHandle {
        queue: queue_name.to_string(),
        consumer_tag,
        deliveries,
    })
}

/// A registered consumer. Read deliveries with [`recv`](Self::recv) or as a
/// [`Stream`], or hand them to a handler with [`spawn`](Self::spawn).
pub struct ConsumerHandle {
    queue: String,
    consumer_tag: String,
    deliveries: DeliveryStream,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Next delivery, or `None` once the consumer has been cancelled or its
    /// channel closed.
    pub async fn recv(&mut self) -> Option<Result<Delivery>> {
        let next = self.deliveries.next().await?;
        Some(next.map_err(|e| {
            RabbitMQError::consumer(format!("delivery from '{}' failed", self.queue), e)
        }))
    }

    /// Feeds deliveries to `handler` one at a time, in arrival order, on a
    /// tokio task. The handler decides whether to ack, nack or reject.
    pub fn spawn<F, Fut>(mut self, handler: F) -> JoinHandle<()>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(next) = self.recv().await {
                match next {
                    Ok(delivery) => handler(delivery).await,
                    Err(e) => {
                        error!(consumer_tag = %self.consumer_tag, error = %e, "Error receiving message");
                        break;
                    }
                }
            }
            debug!(consumer_tag = %self.consumer_tag, "Consumer stream ended");
        })
    }

    /// Stops the broker from sending further deliveries. Messages already
    /// delivered stay unacknowledged until acked or the channel closes.
    pub async fn cancel<C>(self, channel: &C) -> Result<()>
    where
        C: BrokerChannel + ?Sized,
    {
        channel
            .basic_cancel(&self.consumer_tag)
            .await
            .map_err(|e| RabbitMQError::consumer(format!("failed to cancel {}", self.consumer_tag), e))?;
        debug!(consumer_tag = %self.consumer_tag, "Consumer cancelled");
        Ok(())
    }
}

impl Stream for ConsumerHandle {
    type Item = Result<Delivery>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.deliveries.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(RabbitMQError::consumer(
                format!("delivery from '{}' failed", this.queue),
                e,
            )))),
            Poll::Ready(Some(Ok(delivery))) => Poll::Ready(Some(Ok(delivery))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("queue", &self.queue)
            .field("consumer_tag", &self.consumer_tag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rabbitmq::errors::TransportError;
    use crate::rabbitmq::transport::MockBrokerChannel;
    use mockall::Sequence;

    #[test]
    fn consume_side_defaults() {
        let options = ConsumerOptions::default();

        assert!(!options.durable);
        assert!(options.auto_delete);
        assert!(!options.declaration("jobs").exclusive);
    }

    #[tokio::test]
    async fn declares_then_limits_prefetch_then_consumes() {
        let mut seq = Sequence::new();
        let mut channel = MockBrokerChannel::new();
        channel.expect_id().return_const(2u16);
        channel
            .expect_queue_declare()
            .withf(|d| d.name == "jobs" && !d.durable && d.auto_delete && !d.exclusive)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        channel
            .expect_basic_qos()
            .withf(|prefetch, global| *prefetch == 1 && !*global)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        channel
            .expect_basic_consume()
            .withf(|queue, tag| queue == "jobs" && tag.starts_with("consumer-"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(futures_lite::stream::empty().boxed()));

        let handle = register_consumer(&channel, "jobs", &ConsumerOptions::default())
            .await
            .unwrap();

        assert_eq!(handle.queue(), "jobs");
        assert!(handle.consumer_tag().starts_with("consumer-"));
    }

    #[tokio::test]
    async fn declaration_conflict_is_a_consumer_error() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_queue_declare().returning(|d| {
            Err(TransportError::PreconditionFailed {
                queue: d.name.clone(),
                argument: "durable".to_string(),
            })
        });
        channel.expect_basic_qos().never();
        channel.expect_basic_consume().never();

        let err = register_consumer(&channel, "jobs", &ConsumerOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RabbitMQError::ConsumerError { .. }));
    }

    #[tokio::test]
    async fn closed_channel_is_a_consumer_error() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_queue_declare()
            .returning(|_| Err(TransportError::ChannelClosed(2)));

        let err = register_consumer(&channel, "jobs", &ConsumerOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RabbitMQError::ConsumerError {
                source: TransportError::ChannelClosed(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stream_errors_are_wrapped_with_the_queue() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_id().return_const(2u16);
        channel.expect_queue_declare().returning(|_| Ok(()));
        channel.expect_basic_qos().returning(|_, _| Ok(()));
        channel.expect_basic_consume().returning(|_, _| {
            Ok(futures_lite::stream::once(Err(TransportError::ChannelClosed(2))).boxed())
        });

        let mut handle = register_consumer(&channel, "jobs", &ConsumerOptions::default())
            .await
            .unwrap();

        let first = handle.recv().await.unwrap();
        assert!(matches!(first, Err(RabbitMQError::ConsumerError { .. })));
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_sends_the_consumer_tag() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_id().return_const(2u16);
        channel.expect_queue_declare().returning(|_| Ok(()));
        channel.expect_basic_qos().returning(|_, _| Ok(()));
        channel
            .expect_basic_consume()
            .returning(|_, _| Ok(futures_lite::stream::empty().boxed()));

        let handle = register_consumer(&channel, "jobs", &ConsumerOptions::default())
            .await
            .unwrap();
        let tag = handle.consumer_tag().to_string();

        channel
            .expect_basic_cancel()
            .withf(move |t| t == tag)
            .times(1)
            .returning(|_| Ok(()));

        handle.cancel(&channel).await.unwrap();
    }
}

//! In-process stand-in for a RabbitMQ broker, for tests.
//!
//! Reproduces the broker behaviour the operations in this crate depend on:
//!
//! - queue declaration is idempotent for equal parameters; an inequivalent
//!   redeclaration fails with `PRECONDITION_FAILED` and closes the channel
//! - messages go through the default exchange; a routing key naming no
//!   queue drops the message
//! - consumers use manual acknowledgement and the channel's prefetch count
//!   limits each consumer's unacknowledged deliveries
//! - closing a channel requeues its unacknowledged deliveries as redelivered
//! - auto-delete queues go away with their last consumer

use async_trait::async_trait;
use futures_lite::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::rabbitmq::errors::TransportError;
use crate::rabbitmq::transport::{
    Acknowledge, BrokerChannel, BrokerConnection, Delivery, DeliveryStream, QueueDeclaration,
};

type Shared = Arc<Mutex<BrokerState>>;
type ChannelKey = (u64, u16);
type DeliverySender = mpsc::UnboundedSender<Result<Delivery, TransportError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub data: Vec<u8>,
    pub persistent: bool,
    pub redelivered: bool,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub declaration: QueueDeclaration,
    pub ready: Vec<StoredMessage>,
    pub unacked: usize,
    pub consumers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Shared,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a connection. A poisoned broker hands out a closed one.
    pub fn connect(&self) -> InMemoryConnection {
        let id = match lock(&self.state) {
            Ok(mut state) => {
                state.next_connection_id += 1;
                let id = state.next_connection_id;
                state.connections.insert(id, ConnectionState { open: true, next_channel_id: 0 });
                id
            }
            Err(_) => 0,
        };

        InMemoryConnection {
            shared: self.state.clone(),
            id,
        }
    }

    pub fn queue(&self, name: &str) -> Option<QueueSnapshot> {
        let state = lock(&self.state).ok()?;
        let queue = state.queues.get(name)?;
        let unacked = state
            .channels
            .values()
            .flat_map(|channel| channel.unacked.values())
            .filter(|entry| entry.queue == name)
            .count();

        Some(QueueSnapshot {
            declaration: queue.declaration.clone(),
            ready: queue.ready.iter().cloned().collect(),
            unacked,
            consumers: queue.consumers.len(),
        })
    }
}

#[derive(Debug)]
pub struct InMemoryConnection {
    shared: Shared,
    id: u64,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    type Channel = InMemoryChannel;

    fn is_open(&self) -> bool {
        lock(&self.shared)
            .map(|state| state.connection_open(self.id))
            .unwrap_or(false)
    }

    async fn create_channel(&self) -> Result<InMemoryChannel, TransportError> {
        let mut state = lock(&self.shared)?;
        let connection = state
            .connections
            .get_mut(&self.id)
            .filter(|connection| connection.open)
            .ok_or(TransportError::ConnectionClosed)?;

        connection.next_channel_id += 1;
        let key = (self.id, connection.next_channel_id);
        state.channels.insert(
            key,
            ChannelState {
                open: true,
                ..ChannelState::default()
            },
        );

        Ok(InMemoryChannel {
            shared: self.shared.clone(),
            key,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = lock(&self.shared)?;
        if !state.connection_open(self.id) {
            return Err(TransportError::ConnectionClosed);
        }

        let channels: Vec<ChannelKey> = state
            .channels
            .keys()
            .filter(|key| key.0 == self.id)
            .copied()
            .collect();
        for key in channels {
            state.close_channel(&self.shared, key);
        }
        if let Some(connection) = state.connections.get_mut(&self.id) {
            connection.open = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryChannel {
    shared: Shared,
    key: ChannelKey,
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    fn id(&self) -> u16 {
        self.key.1
    }

    fn is_open(&self) -> bool {
        lock(&self.shared)
            .map(|state| state.channel_open(self.key))
            .unwrap_or(false)
    }

    async fn queue_declare(&self, declaration: &QueueDeclaration) -> Result<(), TransportError> {
        lock(&self.shared)?.declare(&self.shared, self.key, declaration)
    }

    async fn basic_qos(&self, prefetch_count: u16, _global: bool) -> Result<(), TransportError> {
        // Applies to consumers started after this call.
        let mut state = lock(&self.shared)?;
        state.channel_mut(self.key)?.prefetch_count = prefetch_count;
        Ok(())
    }

    async fn basic_publish(
        &self,
        _exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> Result<(), TransportError> {
        lock(&self.shared)?.publish(&self.shared, self.key, routing_key, payload, persistent)
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, TransportError> {
        let receiver = lock(&self.shared)?.consume(&self.shared, self.key, queue, consumer_tag)?;

        Ok(futures_lite::stream::unfold(receiver, |mut receiver| async move {
            let item = receiver.recv().await?;
            Some((item, receiver))
        })
        .boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.shared)?;
        state.ensure_open(self.key)?;
        for queue in state.queues.values_mut() {
            queue
                .consumers
                .retain(|consumer| !(consumer.channel == self.key && consumer.tag == consumer_tag));
        }
        state.remove_unused_auto_delete();
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = lock(&self.shared)?;
        state.ensure_open(self.key)?;
        state.close_channel(&self.shared, self.key);
        Ok(())
    }
}

struct MemoryAcker {
    shared: Shared,
    channel: ChannelKey,
    delivery_tag: u64,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        lock(&self.shared)?.settle(&self.shared, self.channel, self.delivery_tag, false)
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        lock(&self.shared)?.settle(&self.shared, self.channel, self.delivery_tag, requeue)
    }

    async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        lock(&self.shared)?.settle(&self.shared, self.channel, self.delivery_tag, requeue)
    }
}

fn lock(shared: &Shared) -> Result<MutexGuard<'_, BrokerState>, TransportError> {
    shared.lock().map_err(|_| TransportError::Poisoned)
}

#[derive(Debug, Default)]
struct BrokerState {
    next_connection_id: u64,
    connections: HashMap<u64, ConnectionState>,
    channels: HashMap<ChannelKey, ChannelState>,
    queues: HashMap<String, Queue>,
}

#[derive(Debug)]
struct ConnectionState {
    open: bool,
    next_channel_id: u16,
}

#[derive(Debug, Default)]
struct ChannelState {
    open: bool,
    prefetch_count: u16,
    next_delivery_tag: u64,
    unacked: HashMap<u64, Unacked>,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    consumer_tag: String,
    message: StoredMessage,
}

#[derive(Debug)]
struct Queue {
    declaration: QueueDeclaration,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    had_consumer: bool,
}

#[derive(Debug)]
struct ConsumerSlot {
    tag: String,
    channel: ChannelKey,
    prefetch_count: u16,
    in_flight: usize,
    sender: DeliverySender,
}

impl ConsumerSlot {
    fn has_capacity(&self) -> bool {
        self.prefetch_count == 0 || self.in_flight < usize::from(self.prefetch_count)
    }
}

impl BrokerState {
    fn connection_open(&self, id: u64) -> bool {
        self.connections.get(&id).is_some_and(|c| c.open)
    }

    fn channel_open(&self, key: ChannelKey) -> bool {
        self.connection_open(key.0) && self.channels.get(&key).is_some_and(|c| c.open)
    }

    fn ensure_open(&self, key: ChannelKey) -> Result<(), TransportError> {
        if self.channel_open(key) {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed(key.1))
        }
    }

    fn channel_mut(&mut self, key: ChannelKey) -> Result<&mut ChannelState, TransportError> {
        self.ensure_open(key)?;
        self.channels
            .get_mut(&key)
            .ok_or(TransportError::ChannelClosed(key.1))
    }

    /// Channel-level exception: the broker closes the channel and reports
    /// `error`.
    fn fail_channel<T>(
        &mut self,
        shared: &Shared,
        key: ChannelKey,
        error: TransportError,
    ) -> Result<T, TransportError> {
        debug!(channel_id = key.1, error = %error, "Closing channel after exception");
        self.close_channel(shared, key);
        Err(error)
    }

    fn declare(
        &mut self,
        shared: &Shared,
        key: ChannelKey,
        declaration: &QueueDeclaration,
    ) -> Result<(), TransportError> {
        self.ensure_open(key)?;

        if let Some(existing) = self.queues.get(&declaration.name) {
            return match existing.declaration.inequivalent_arg(declaration) {
                Some(argument) => self.fail_channel(
                    shared,
                    key,
                    TransportError::PreconditionFailed {
                        queue: declaration.name.clone(),
                        argument: argument.to_string(),
                    },
                ),
                None => Ok(()),
            };
        }

        debug!(queue = %declaration.name, "Creating queue");
        self.queues.insert(
            declaration.name.clone(),
            Queue {
                declaration: declaration.clone(),
                ready: VecDeque::new(),
                consumers: Vec::new(),
                had_consumer: false,
            },
        );
        Ok(())
    }

    fn publish(
        &mut self,
        shared: &Shared,
        key: ChannelKey,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> Result<(), TransportError> {
        self.ensure_open(key)?;

        match self.queues.get_mut(routing_key) {
            Some(queue) => {
                queue.ready.push_back(StoredMessage {
                    data: payload.to_vec(),
                    persistent,
                    redelivered: false,
                });
                self.dispatch(shared, routing_key);
            }
            None => debug!(routing_key, "Unroutable message dropped"),
        }
        Ok(())
    }

    fn consume(
        &mut self,
        shared: &Shared,
        key: ChannelKey,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Result<mpsc::UnboundedReceiver<Result<Delivery, TransportError>>, TransportError> {
        let prefetch_count = self.channel_mut(key)?.prefetch_count;

        let Some(queue) = self.queues.get_mut(queue_name) else {
            return self.fail_channel(
                shared,
                key,
                TransportError::NotFound(format!("no queue '{}'", queue_name)),
            );
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        queue.consumers.push(ConsumerSlot {
            tag: consumer_tag.to_string(),
            channel: key,
            prefetch_count,
            in_flight: 0,
            sender,
        });
        queue.had_consumer = true;

        self.dispatch(shared, queue_name);
        Ok(receiver)
    }

    fn settle(
        &mut self,
        shared: &Shared,
        key: ChannelKey,
        delivery_tag: u64,
        requeue: bool,
    ) -> Result<(), TransportError> {
        let channel = self.channel_mut(key)?;
        let Some(entry) = channel.unacked.remove(&delivery_tag) else {
            return self.fail_channel(shared, key, TransportError::UnknownDeliveryTag(delivery_tag));
        };

        let Unacked {
            queue: queue_name,
            consumer_tag,
            mut message,
        } = entry;

        if let Some(queue) = self.queues.get_mut(&queue_name) {
            if let Some(consumer) = queue
                .consumers
                .iter_mut()
                .find(|consumer| consumer.channel == key && consumer.tag == consumer_tag)
            {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
            if requeue {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }

        self.dispatch(shared, &queue_name);
        Ok(())
    }

    fn close_channel(&mut self, shared: &Shared, key: ChannelKey) {
        let Some(channel) = self.channels.get_mut(&key).filter(|c| c.open) else {
            return;
        };
        channel.open = false;

        let mut unacked: Vec<(u64, Unacked)> = channel.unacked.drain().collect();
        // Highest tag first, so the oldest delivery ends up at the head.
        unacked.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));

        for queue in self.queues.values_mut() {
            queue.consumers.retain(|consumer| consumer.channel != key);
        }
        for (_, entry) in unacked {
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                let mut message = entry.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }

        self.remove_unused_auto_delete();
        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            self.dispatch(shared, &name);
        }
    }

    fn remove_unused_auto_delete(&mut self) {
        self.queues.retain(|name, queue| {
            let unused =
                queue.declaration.auto_delete && queue.had_consumer && queue.consumers.is_empty();
            if unused {
                debug!(queue = %name, "Auto-deleting queue");
            }
            !unused
        });
    }

    /// Hands ready messages to the first consumer with spare prefetch.
    fn dispatch(&mut self, shared: &Shared, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        while !queue.ready.is_empty() {
            let Some(index) = queue.consumers.iter().position(ConsumerSlot::has_capacity) else {
                break;
            };
            let consumer_key = queue.consumers[index].channel;
            let Some(channel) = self.channels.get_mut(&consumer_key).filter(|c| c.open) else {
                queue.consumers.remove(index);
                continue;
            };
            let Some(message) = queue.ready.pop_front() else {
                break;
            };

            channel.next_delivery_tag += 1;
            let delivery_tag = channel.next_delivery_tag;
            let delivery = Delivery::new(
                delivery_tag,
                queue_name,
                message.redelivered,
                message.persistent,
                message.data.clone(),
                Box::new(MemoryAcker {
                    shared: shared.clone(),
                    channel: consumer_key,
                    delivery_tag,
                }),
            );

            let consumer = &mut queue.consumers[index];
            if consumer.sender.send(Ok(delivery)).is_err() {
                // Receiver dropped: the consumer is gone.
                queue.consumers.remove(index);
                queue.ready.push_front(message);
                continue;
            }

            consumer.in_flight += 1;
            channel.unacked.insert(
                delivery_tag,
                Unacked {
                    queue: queue_name.to_string(),
                    consumer_tag: consumer.tag.clone(),
                    message,
                },
            );
        }
    }
}

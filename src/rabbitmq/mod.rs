// src/rabbitmq/mod.rs
// Connection, channel, publish and consume operations against RabbitMQ

pub mod errors;
pub mod transport;

pub mod amqp_client; // lapin-backed transport
pub mod channel_manager;
pub mod connection;
pub mod consumer;
pub mod publisher;

pub use amqp_client::{AmqpChannel, AmqpConnection};
pub use channel_manager::{open_channel, ChannelOptions};
pub use connection::ConnectionFactory;
pub use consumer::{register_consumer, ConsumerHandle, ConsumerOptions, FAIR_DISPATCH_PREFETCH};
pub use errors::{describe_error, RabbitMQError, Result, TransportError};
pub use publisher::{publish, PublishOptions, MAX_ROUTING_KEY_LEN, PUBLISH_CONFIRMATION};
pub use transport::{Acknowledge, BrokerChannel, BrokerConnection, Delivery, QueueDeclaration};

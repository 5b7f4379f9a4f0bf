//! Thin operations over a RabbitMQ connection: open a connection from
//! configuration, provision a channel with a declared queue, publish with a
//! wrapped outcome and register a fair-dispatch, manual-ack consumer.
//!
//! The operations are generic over [`BrokerConnection`] and
//! [`BrokerChannel`]. [`AmqpConnection`] speaks AMQP 0-9-1 through lapin.
//! With the `test-util` feature, `memory::InMemoryBroker` runs in-process
//! for tests.

pub mod config;
pub mod env;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod rabbitmq;
pub mod response;

pub use config::BrokerConfig;
pub use rabbitmq::{
    describe_error, open_channel, publish, register_consumer, Acknowledge, AmqpChannel,
    AmqpConnection, BrokerChannel, BrokerConnection, ChannelOptions, ConnectionFactory,
    ConsumerHandle, ConsumerOptions, Delivery, PublishOptions, QueueDeclaration, RabbitMQError,
    Result, TransportError, FAIR_DISPATCH_PREFETCH, PUBLISH_CONFIRMATION,
};
pub use response::QueueResponse;

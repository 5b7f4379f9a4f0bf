// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Faults raised by the broker-client layer, before they are given
/// operation context.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Amqp(#[from] LapinError),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("channel {0} is closed")]
    ChannelClosed(u16),

    #[error("PRECONDITION_FAILED - inequivalent arg '{argument}' for queue '{queue}'")]
    PreconditionFailed { queue: String, argument: String },

    #[error("NOT_FOUND - {0}")]
    NotFound(String),

    #[error("PRECONDITION_FAILED - unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    #[error("broker state lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum RabbitMQError {
    #[error("RabbitMQ connection error: could not connect to {endpoint}")]
    ConnectionError {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("RabbitMQ channel error: {context}")]
    ChannelError {
        context: String,
        #[source]
        source: TransportError,
    },

    #[error("RabbitMQ consume error: {context}")]
    ConsumerError {
        context: String,
        #[source]
        source: TransportError,
    },

    #[error("RabbitMQ publish error: could not publish to '{routing_key}'")]
    PublishError {
        routing_key: String,
        #[source]
        source: TransportError,
    },

    #[error("Invalid routing key: {0}")]
    InvalidRoutingKey(String),

    #[error("RabbitMQ acknowledge error for delivery {delivery_tag}")]
    AckError {
        delivery_tag: u64,
        #[source]
        source: TransportError,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to read config file at {}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file at {} contains invalid JSON", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl RabbitMQError {
    pub(crate) fn channel(context: impl Into<String>, source: TransportError) -> Self {
        RabbitMQError::ChannelError {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn consumer(context: impl Into<String>, source: TransportError) -> Self {
        RabbitMQError::ConsumerError {
            context: context.into(),
            source,
        }
    }
}

impl From<std::num::ParseIntError> for RabbitMQError {
    fn from(err: std::num::ParseIntError) -> Self {
        RabbitMQError::ConfigError(format!("Parse error: {}", err))
    }
}

/// Renders an error followed by every error in its `source()` chain,
/// joined with `": "`. An error without a source renders as its own
/// message only. A cause whose text the rendering already ends with (an
/// error that prints its own source) is not repeated.
pub fn describe_error(error: &(dyn StdError + 'static)) -> String {
    let mut description = error.to_string();
    let mut cause = error.source();

    while let Some(inner) = cause {
        let text = inner.to_string();
        if !text.is_empty() && !description.ends_with(&text) {
            description.push_str(": ");
            description.push_str(&text);
        }
        cause = inner.source();
    }

    description
}

// These need a RabbitMQ listening as described by the fixture config:
//   cargo test --test integration -- --ignored

use std::path::Path;
use std::time::Duration;

use rabbitmq_operations::{
    open_channel, publish, register_consumer, AmqpConnection, BrokerChannel, BrokerConfig,
    BrokerConnection, ChannelOptions, ConnectionFactory, ConsumerOptions, PublishOptions,
    RabbitMQError, PUBLISH_CONFIRMATION,
};
use tokio::time::timeout;
use uuid::Uuid;

fn load_test_config() -> BrokerConfig {
    let config_path = Path::new("tests/fixtures/rabbitmq/configs/test_config.json");
    BrokerConfig::from_json_file(config_path).expect("Failed to load test config")
}

async fn connect() -> AmqpConnection {
    ConnectionFactory::new(load_test_config())
        .connect()
        .await
        .expect("Failed to connect to RabbitMQ")
}

fn unique_queue(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_connection_establishes() {
    let connection = connect().await;

    assert!(connection.is_open());
    connection.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_publish_to_orders() {
    let connection = connect().await;
    let channel = open_channel(&connection, "orders", &ChannelOptions::default())
        .await
        .unwrap();

    let response = publish(&channel, &[1, 2, 3], "orders", &PublishOptions::default()).await;

    assert_eq!(response.value().map(String::as_str), Some(PUBLISH_CONFIRMATION));
    connection.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_durable_redeclared_transient_conflicts() {
    let connection = connect().await;
    let queue = unique_queue("conflict");
    let durable = ChannelOptions {
        auto_delete: true,
        ..ChannelOptions::default()
    };

    let channel = open_channel(&connection, &queue, &durable).await.unwrap();
    let transient = ChannelOptions {
        durable: false,
        ..durable
    };
    let err = open_channel(&connection, &queue, &transient).await.unwrap_err();
    assert!(matches!(err, RabbitMQError::ChannelError { .. }));

    channel.close().await.unwrap();
    connection.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_publish_after_channel_close() {
    let connection = connect().await;
    let queue = unique_queue("closed");
    let options = ChannelOptions {
        durable: false,
        auto_delete: true,
        exclusive: true,
    };
    let channel = open_channel(&connection, &queue, &options).await.unwrap();
    channel.close().await.unwrap();

    let response = publish(&channel, b"late", &queue, &PublishOptions::default()).await;

    assert!(response.is_error());
    assert!(!response.error_message().unwrap_or_default().is_empty());
    connection.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_consume_and_ack() {
    let connection = connect().await;
    let channel = connection.create_channel().await.unwrap();
    let queue = unique_queue("consume");

    let mut consumer = register_consumer(&channel, &queue, &ConsumerOptions::default())
        .await
        .unwrap();
    publish(&channel, b"ping", &queue, &PublishOptions::transient()).await;

    let delivery = timeout(Duration::from_secs(5), consumer.recv())
        .await
        .expect("no delivery within 5s")
        .unwrap()
        .unwrap();
    assert_eq!(delivery.data, b"ping");
    delivery.ack().await.unwrap();

    consumer.cancel(&channel).await.unwrap();
    connection.close().await.unwrap();
}

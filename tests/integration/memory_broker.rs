use std::time::Duration;

use rabbitmq_operations::memory::{InMemoryBroker, StoredMessage};
use rabbitmq_operations::{
    open_channel, publish, register_consumer, BrokerChannel, BrokerConnection, ChannelOptions,
    ConsumerOptions, PublishOptions, RabbitMQError, PUBLISH_CONFIRMATION,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

// How long a message that must not arrive is waited for.
const QUIET_PERIOD: Duration = Duration::from_millis(100);
// Upper bound for a message that must arrive.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn publish_to_orders_is_enqueued() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();

    let channel = open_channel(&connection, "orders", &ChannelOptions::default())
        .await
        .unwrap();
    let response = publish(&channel, &[1, 2, 3], "orders", &PublishOptions::default()).await;

    assert!(!response.is_error());
    assert_eq!(response.value().map(String::as_str), Some(PUBLISH_CONFIRMATION));

    let queue = broker.queue("orders").unwrap();
    assert!(queue.declaration.durable);
    assert_eq!(
        queue.ready,
        vec![StoredMessage {
            data: vec![1, 2, 3],
            persistent: true,
            redelivered: false,
        }]
    );
}

#[tokio::test]
async fn publish_after_close_reports_an_error() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();
    let channel = open_channel(&connection, "orders", &ChannelOptions::default())
        .await
        .unwrap();

    channel.close().await.unwrap();
    let response = publish(&channel, &[1, 2, 3], "orders", &PublishOptions::default()).await;

    assert!(response.is_error());
    let message = response.error_message().unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("is closed"), "unexpected message: {message}");
    assert!(broker.queue("orders").unwrap().ready.is_empty());
}

#[tokio::test]
async fn transient_publish_is_not_persistent() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();
    let channel = open_channel(&connection, "events", &ChannelOptions::default())
        .await
        .unwrap();

    publish(&channel, b"tick", "events", &PublishOptions::transient()).await;

    assert!(!broker.queue("events").unwrap().ready[0].persistent);
}

#[tokio::test]
async fn second_message_waits_for_the_first_ack() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();
    let channel = connection.create_channel().await.unwrap();

    let mut consumer = register_consumer(&channel, "jobs", &ConsumerOptions::default())
        .await
        .unwrap();
    for payload in [b"first", b"other"] {
        let response = publish(&channel, payload, "jobs", &PublishOptions::default()).await;
        assert!(!response.is_error());
    }

    let first = consumer.recv().await.unwrap().unwrap();
    assert_eq!(first.data, b"first");

    assert!(
        timeout(QUIET_PERIOD, consumer.recv()).await.is_err(),
        "second message delivered before the first was acknowledged"
    );
    assert_eq!(broker.queue("jobs").unwrap().ready.len(), 1);

    first.ack().await.unwrap();

    let second = timeout(DELIVERY_TIMEOUT, consumer.recv())
        .await
        .expect("second message not delivered after ack")
        .unwrap()
        .unwrap();
    assert_eq!(second.data, b"other");
    assert!(!second.redelivered);
}

#[tokio::test]
async fn nacked_message_comes_back_redelivered() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();
    let channel = connection.create_channel().await.unwrap();
    let mut consumer = register_consumer(&channel, "retries", &ConsumerOptions::default())
        .await
        .unwrap();

    publish(&channel, b"flaky", "retries", &PublishOptions::default()).await;
    let first = consumer.recv().await.unwrap().unwrap();
    first.nack(true).await.unwrap();

    let again = consumer.recv().await.unwrap().unwrap();
    assert_eq!(again.data, b"flaky");
    assert!(again.redelivered);
    assert!(again.persistent);

    again.reject(false).await.unwrap();
    let queue = broker.queue("retries").unwrap();
    assert!(queue.ready.is_empty());
    assert_eq!(queue.unacked, 0);
}

#[tokio::test]
async fn consumer_defaults_conflict_with_a_publisher_provisioned_queue() {
    let broker = InMemoryBroker::new();
    let publisher_connection = broker.connect();
    let consumer_connection = broker.connect();

    open_channel(&publisher_connection, "orders", &ChannelOptions::default())
        .await
        .unwrap();

    let channel = consumer_connection.create_channel().await.unwrap();
    let err = register_consumer(&channel, "orders", &ConsumerOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RabbitMQError::ConsumerError { .. }));

    let matching = ConsumerOptions {
        durable: true,
        auto_delete: false,
    };
    let channel = consumer_connection.create_channel().await.unwrap();
    assert!(register_consumer(&channel, "orders", &matching).await.is_ok());
}

#[tokio::test]
async fn spawned_handler_sees_messages_in_order() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();
    let channel = connection.create_channel().await.unwrap();
    let consumer = register_consumer(&channel, "audit", &ConsumerOptions::default())
        .await
        .unwrap();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let task = consumer.spawn(move |delivery| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(delivery.data.clone());
            let _ = delivery.ack().await;
        }
    });

    for payload in [b"a", b"b", b"c"] {
        publish(&channel, payload, "audit", &PublishOptions::default()).await;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(seen_rx.recv().await.unwrap());
    }
    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    channel.close().await.unwrap();
    timeout(DELIVERY_TIMEOUT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn cancelling_the_last_consumer_deletes_an_auto_delete_queue() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();
    let channel = connection.create_channel().await.unwrap();
    let consumer = register_consumer(&channel, "scratch", &ConsumerOptions::default())
        .await
        .unwrap();
    assert_eq!(broker.queue("scratch").unwrap().consumers, 1);

    consumer.cancel(&channel).await.unwrap();

    assert!(broker.queue("scratch").is_none());
}

#[tokio::test]
async fn unacked_work_moves_to_another_consumer_when_a_channel_closes() {
    let broker = InMemoryBroker::new();
    let options = ConsumerOptions {
        durable: true,
        auto_delete: false,
    };

    let first_connection = broker.connect();
    let first_channel = first_connection.create_channel().await.unwrap();
    let mut first = register_consumer(&first_channel, "work", &options).await.unwrap();

    publish(&first_channel, b"job", "work", &PublishOptions::default()).await;
    let taken = first.recv().await.unwrap().unwrap();
    assert!(!taken.redelivered);

    let second_connection = broker.connect();
    let second_channel = second_connection.create_channel().await.unwrap();
    let mut second = register_consumer(&second_channel, "work", &options).await.unwrap();

    first_connection.close().await.unwrap();

    let retried = timeout(DELIVERY_TIMEOUT, second.recv())
        .await
        .expect("requeued message not delivered")
        .unwrap()
        .unwrap();
    assert_eq!(retried.data, b"job");
    assert!(retried.redelivered);
    assert!(first.recv().await.is_none());
}

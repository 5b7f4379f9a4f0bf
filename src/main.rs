use anyhow::{anyhow, Context};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rabbitmq_operations::{
    open_channel, publish, register_consumer, BrokerChannel, BrokerConfig, BrokerConnection,
    ChannelOptions, ConnectionFactory, ConsumerOptions, PublishOptions,
};

const ORDERS_QUEUE: &str = "orders";
const DEMO_QUEUE: &str = "orders-demo";
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lapin=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = BrokerConfig::load().context("failed to load broker configuration")?;
    let connection = ConnectionFactory::new(config).connect().await?;

    let channel = open_channel(&connection, ORDERS_QUEUE, &ChannelOptions::default()).await?;
    let response = publish(&channel, &[1, 2, 3], ORDERS_QUEUE, &PublishOptions::default()).await;
    match response.error_message() {
        Some(message) => warn!(queue = ORDERS_QUEUE, error = %message, "Publish failed"),
        None => info!(queue = ORDERS_QUEUE, response = ?response.value(), "Publish succeeded"),
    }

    let mut consumer = register_consumer(&channel, DEMO_QUEUE, &ConsumerOptions::default()).await?;
    publish(&channel, b"hello", DEMO_QUEUE, &PublishOptions::transient())
        .await
        .into_result()
        .map_err(|message| anyhow!(message))?;

    match timeout(RECEIVE_TIMEOUT, consumer.recv()).await {
        Ok(Some(delivery)) => {
            let delivery = delivery?;
            info!(
                delivery_tag = delivery.delivery_tag,
                payload = %String::from_utf8_lossy(&delivery.data),
                "Received message"
            );
            delivery.ack().await?;
        }
        Ok(None) => warn!(queue = DEMO_QUEUE, "Consumer ended before a message arrived"),
        Err(_) => warn!(queue = DEMO_QUEUE, "No message within {:?}", RECEIVE_TIMEOUT),
    }

    consumer.cancel(&channel).await?;
    channel.close().await?;
    connection.close().await?;
    info!("Connection closed");

    Ok(())
}

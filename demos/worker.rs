use amqp_worker::amqp::configuration::{ProcessorSettings, RabbitMqSettings};
use amqp_worker::amqp::ConnectionFactory;
use amqp_worker::consumers::Processor;
use serde::Deserialize;
use shutdown_handler::ShutdownHandler;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Order {
    id: u64,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // We are using the out-of-the-box parameters for the default RabbitMq Docker image.
    // The `orders` queue is expected to exist already: the worker does not declare it.
    let settings = ProcessorSettings {
        rabbitmq: RabbitMqSettings::default(),
        queue_name: "orders".into(),
        prefetch_count: None,
        retry_delay_seconds: Some(5),
    };
    let connection_factory = ConnectionFactory::new_from_config(&settings.rabbitmq)?;

    let processor = Processor::from_settings(connection_factory, &settings)
        .handler(|_shutdown: Arc<ShutdownHandler>, payload: Vec<u8>| async move {
            // A malformed payload is never acked: the broker hands it out again.
            let order: Order = serde_json::from_slice(&payload)?;
            tracing::info!("Order {} fulfilled", order.id);
            Ok::<_, anyhow::Error>(())
        })
        .build()?;

    // Runs one processing cycle after the other, until SIGTERM.
    processor.run_until_sigterm().await
}

use crate::{
    amqp::{
        transport::{Channel, Connection, DeliveryStream, TransportFactory},
        BrokerConnection, ConnectionFactory,
    },
    consumers::{handler::MessageProcessor, Delivery, ProcessingError, ProcessorError},
};
use amq_protocol_types::FieldTable;
use futures_util::{FutureExt, StreamExt};
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions};
use shutdown_handler::ShutdownHandler;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Pulls messages from a RabbitMq queue and hands their payload to a [`MessageProcessor`].
///
/// Each call to [`Processor::process`] is a full cycle: connect, register a consumer,
/// wait for one delivery (or for a shutdown signal), process it, tear everything down.
/// [`Processor::run_until_shutdown`] chains cycles until the service is asked to stop.
///
/// Build one with [`Processor::builder`].
pub struct Processor<T: TransportFactory = ConnectionFactory> {
    pub(super) transport: T,
    pub(super) address: String,
    pub(super) queue_name: String,
    pub(super) message_processor: Arc<dyn MessageProcessor>,
    pub(super) prefetch_count: u16,
    pub(super) retry_delay: Duration,
}

/// What ended the wait for a delivery.
enum ConsumerEvent {
    Shutdown,
    Delivery(Delivery),
    StreamError(anyhow::Error),
    StreamClosed,
}

impl<T: TransportFactory> Processor<T> {
    /// The address of the broker we are pulling from.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The name of the queue we are pulling from.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// How many unacknowledged messages the broker may push ahead of time.
    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    /// How long [`Processor::run_until_shutdown`] waits after a failed cycle.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Run a single processing cycle.
    ///
    /// `process` connects to the broker, registers a consumer with a fresh tag and waits for
    /// whichever comes first: a shutdown signal or a delivery.
    /// At most one message is processed per call - deliveries still waiting on the stream are
    /// left to the broker, which hands them out again once the consumer is cancelled.
    ///
    /// If a message is received, the message processor runs on its own task and `process`
    /// waits for it to complete. The message is acked if processing succeeds, it is left
    /// unacknowledged otherwise.
    ///
    /// The consumer is then cancelled and the connection closed.
    /// Processing failures are logged, they do not fail the call: the returned value reflects
    /// connection, consumer registration and connection close outcomes only, plus a delivery
    /// stream that ended or failed before yielding a message.
    #[tracing::instrument(
        skip_all,
        name = "processor_process",
        fields(queue_name = %self.queue_name, consumer_tag = tracing::field::Empty)
    )]
    pub async fn process(&self, shutdown: Arc<ShutdownHandler>) -> Result<(), ProcessorError> {
        let connection = BrokerConnection::open(&self.transport, &self.address).await?;

        let consumer_tag = Uuid::new_v4().to_string();
        tracing::Span::current().record("consumer_tag", consumer_tag.as_str());

        let registration = self
            .register_consumer(connection.channel(), &consumer_tag)
            .await;
        let deliveries = match registration {
            Ok(deliveries) => deliveries,
            Err(source) => {
                if let Err(e) = connection.close().await {
                    warn!(error = ?e, "Failed to close the connection after consumer registration failed");
                }
                return Err(ProcessorError::ConsumerRegistration {
                    queue: self.queue_name.clone(),
                    source,
                });
            }
        };
        info!("Consuming messages for tag {}", consumer_tag);

        let interrupted = match Self::next_event(deliveries, &shutdown).await {
            ConsumerEvent::Shutdown => {
                info!("Cancellation requested");
                None
            }
            ConsumerEvent::StreamClosed => {
                warn!("The broker closed the delivery stream");
                Some(anyhow::anyhow!("The broker closed the delivery stream."))
            }
            ConsumerEvent::StreamError(e) => {
                error!(error = ?e, "Failed to receive a message from the broker");
                Some(e)
            }
            ConsumerEvent::Delivery(delivery) => {
                let message_id = delivery
                    .message_id
                    .clone()
                    .unwrap_or_else(|| delivery.delivery_tag.to_string());
                info!("Processing message {}", message_id);
                if let Err(e) = self.dispatch(delivery, shutdown).await {
                    error!(error = ?e, "Failed to process message {}", message_id);
                }
                None
            }
        };

        if let Err(e) = connection
            .channel()
            .basic_cancel(&consumer_tag, BasicCancelOptions { nowait: true })
            .await
        {
            error!(error = ?e, "Failed to cancel consumer {}", consumer_tag);
        }

        connection.close().await.map_err(ProcessorError::Teardown)?;

        match interrupted {
            Some(source) => Err(ProcessorError::DeliveryStream {
                queue: self.queue_name.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    async fn register_consumer(
        &self,
        channel: &<T::Connection as Connection>::Channel,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, anyhow::Error> {
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions { global: false })
            .await?;
        channel
            .basic_consume(
                &self.queue_name,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
    }

    /// Wait for either a shutdown signal or the first event on the delivery stream.
    async fn next_event(
        mut deliveries: DeliveryStream,
        shutdown: &ShutdownHandler,
    ) -> ConsumerEvent {
        tokio::select! {
            // Prefer shutting down over picking up more work.
            biased;

            _ = shutdown.wait_for_signal() => ConsumerEvent::Shutdown,

            event = deliveries.next() => match event {
                None => ConsumerEvent::StreamClosed,
                Some(Err(e)) => ConsumerEvent::StreamError(e),
                Some(Ok(delivery)) => ConsumerEvent::Delivery(delivery),
            },
        }
    }

    /// Run the message processor on its own task, then ack the delivery if it succeeded.
    async fn dispatch(
        &self,
        delivery: Delivery,
        shutdown: Arc<ShutdownHandler>,
    ) -> Result<(), ProcessingError> {
        let Delivery { data, acker, .. } = delivery;
        let message_processor = Arc::clone(&self.message_processor);
        let task = tokio::spawn(
            async move { message_processor.process(shutdown, data).await }
                .instrument(tracing::Span::current()),
        );

        // The outcome travels back through the join handle: nothing is acked, cancelled or
        // closed until the message processor is done.
        task.await
            .map_err(ProcessingError::Panicked)?
            .map_err(ProcessingError::Failed)?;

        acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(ProcessingError::Ack)
    }

    /// Chain processing cycles until `shutdown` fires.
    ///
    /// A failed cycle (e.g. the broker is unreachable) is logged and retried after
    /// [`Processor::retry_delay`]. The wait is cut short if shutdown is requested in the meantime.
    #[tracing::instrument(skip_all, name = "processor_run", fields(queue_name = %self.queue_name))]
    pub async fn run_until_shutdown(&self, shutdown: Arc<ShutdownHandler>) {
        loop {
            if shutdown.wait_for_signal().now_or_never().is_some() {
                break;
            }

            if let Err(e) = self.process(shutdown.clone()).await {
                error!(error = ?e, "Processing cycle failed, retrying in {:?}", self.retry_delay);
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for_signal() => break,
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
        info!("Shutdown requested, the processor is stopping");
    }

    /// You can call `run_until_sigterm` to start processing messages.
    /// As the name implies, `run_until_sigterm` returns control to the caller only when the
    /// application is stopped via SIGTERM.
    pub async fn run_until_sigterm(&self) -> Result<(), anyhow::Error> {
        self.run_until_shutdown(ShutdownHandler::sigterm()?).await;
        Ok(())
    }
}

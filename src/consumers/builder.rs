use crate::{
    amqp::{configuration::ProcessorSettings, transport::TransportFactory},
    consumers::{
        handler::{ClosureProcessor, MessageProcessor},
        processor::Processor,
        ProcessorError,
    },
};
use shutdown_handler::ShutdownHandler;
use std::{future::Future, sync::Arc, time::Duration};

/// A fluent API to assemble a [`Processor`].
///
/// Use [`Processor::builder`] or [`Processor::from_settings`] as entrypoint.
pub struct ProcessorBuilder<T> {
    transport: T,
    address: String,
    queue_name: String,
    message_processor: Option<Arc<dyn MessageProcessor>>,
    prefetch_count: u16,
    retry_delay: Duration,
}

impl<T: TransportFactory> Processor<T> {
    /// Start building a [`Processor`] pulling messages from `queue_name`, on the broker
    /// listening at `address`.
    ///
    /// `transport` is used to dial the broker on every processing cycle - use
    /// [`ConnectionFactory`](crate::amqp::ConnectionFactory) to talk to RabbitMq.
    pub fn builder(
        transport: T,
        address: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> ProcessorBuilder<T> {
        ProcessorBuilder {
            transport,
            address: address.into(),
            queue_name: queue_name.into(),
            message_processor: None,
            prefetch_count: 1,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Start building a [`Processor`] from configuration.
    ///
    /// The broker address is derived from [`RabbitMqSettings::amqp_address`].
    /// Optional knobs left unspecified in `settings` keep their defaults.
    ///
    /// [`RabbitMqSettings::amqp_address`]: crate::amqp::configuration::RabbitMqSettings::amqp_address
    pub fn from_settings(transport: T, settings: &ProcessorSettings) -> ProcessorBuilder<T> {
        let mut builder = Self::builder(
            transport,
            settings.rabbitmq.amqp_address(),
            settings.queue_name.clone(),
        );
        if let Some(prefetch_count) = settings.prefetch_count {
            builder = builder.prefetch_count(prefetch_count);
        }
        if let Some(retry_delay) = settings.retry_delay() {
            builder = builder.retry_delay(retry_delay);
        }
        builder
    }
}

impl<T: TransportFactory> ProcessorBuilder<T> {
    /// The logic to run on the payload of every message pulled from the queue.
    #[must_use]
    pub fn message_processor(mut self, message_processor: impl MessageProcessor) -> Self {
        self.message_processor = Some(Arc::new(message_processor));
        self
    }

    /// Use an async closure as message processor.
    ///
    /// ```rust
    /// use amqp_worker::amqp::ConnectionFactory;
    /// use amqp_worker::consumers::Processor;
    ///
    /// let processor = Processor::builder(ConnectionFactory::default(), "amqp://localhost", "orders")
    ///     .handler(|_shutdown, payload: Vec<u8>| async move {
    ///         println!("{}", String::from_utf8_lossy(&payload));
    ///         Ok::<_, anyhow::Error>(())
    ///     })
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(processor.queue_name(), "orders");
    /// ```
    #[must_use]
    pub fn handler<F, Fut, E>(self, handler: F) -> Self
    where
        F: Fn(Arc<ShutdownHandler>, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.message_processor(ClosureProcessor(handler))
    }

    /// How many unacknowledged messages the broker may push ahead of time.
    ///
    /// Defaults to 1.
    #[must_use]
    pub fn prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// How long [`Processor::run_until_shutdown`] waits before starting a new cycle after
    /// a failed one.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Validate the inputs and build the [`Processor`].
    ///
    /// Fails with [`ProcessorError::Construction`] if the address or the queue name are empty,
    /// or if no message processor was provided.
    pub fn build(self) -> Result<Processor<T>, ProcessorError> {
        if self.address.is_empty() {
            return Err(ProcessorError::Construction("a broker address is required"));
        }
        if self.queue_name.is_empty() {
            return Err(ProcessorError::Construction("a queue name is required"));
        }
        let message_processor = self
            .message_processor
            .ok_or(ProcessorError::Construction("a message processor is required"))?;
        Ok(Processor {
            transport: self.transport,
            address: self.address,
            queue_name: self.queue_name,
            message_processor,
            prefetch_count: self.prefetch_count,
            retry_delay: self.retry_delay,
        })
    }
}

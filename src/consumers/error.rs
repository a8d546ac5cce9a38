/// The error type returned when building or running a [`Processor`](super::Processor).
///
/// Failures of the message processor itself are not part of it: see [`ProcessingError`].
#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
    /// A required input was missing or empty.
    #[error("Failed to build the processor: {0}.")]
    Construction(&'static str),
    /// The broker could not be reached, or it rejected the connection.
    #[error("Failed to connect to the broker @ {address}.")]
    Connection {
        address: String,
        #[source]
        source: anyhow::Error,
    },
    /// The connection was established but the channel could not be allocated.
    #[error("Failed to open a channel on the broker @ {address}.")]
    Channel {
        address: String,
        #[source]
        source: anyhow::Error,
    },
    /// The broker refused our subscription to the queue.
    #[error("Failed to register a consumer on queue {queue}.")]
    ConsumerRegistration {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
    /// The delivery stream ended or failed before handing us a message.
    ///
    /// Returned once the consumer has been torn down, so that callers chaining cycles
    /// back off before reconnecting.
    #[error("The delivery stream of queue {queue} was interrupted.")]
    DeliveryStream {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
    /// The connection could not be closed cleanly.
    #[error("Failed to close the connection to the broker.")]
    Teardown(#[source] anyhow::Error),
}

/// Why a delivery was left unacknowledged.
///
/// Processing errors are logged by the processor loop and never returned to the caller:
/// the broker redelivers the message once the consumer is cancelled.
#[derive(thiserror::Error, Debug)]
pub enum ProcessingError {
    #[error("The message processor returned an error.")]
    Failed(#[source] anyhow::Error),
    #[error("The message processor panicked.")]
    Panicked(#[source] tokio::task::JoinError),
    #[error("Failed to acknowledge the message.")]
    Ack(#[source] anyhow::Error),
}

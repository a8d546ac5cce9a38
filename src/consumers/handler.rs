//! The `MessageProcessor` trait is what service authors implement to do their actual work.
use shutdown_handler::ShutdownHandler;
use std::future::Future;
use std::sync::Arc;

/// Implementers of the `MessageProcessor` trait can be plugged into a
/// [`Processor`](crate::consumers::Processor) to handle the payload of a message pulled from a queue.
///
/// # Scope
///
/// `process` does not get access to the underlying RabbitMq channel, nor to the delivery.
/// The framework acks the message if `process` succeeds and leaves it unacknowledged otherwise,
/// so that the broker redelivers it.
///
/// `process` runs on its own task. The shutdown handler it receives is the one the
/// processor loop is watching: long-running work can use it to bail out early.
///
/// # Implementors
///
/// Most of the time you will pass an async closure to
/// [`ProcessorBuilder::handler`](crate::consumers::ProcessorBuilder::handler), which wraps it in a
/// [`ClosureProcessor`] for you.
#[async_trait::async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    async fn process(
        &self,
        shutdown: Arc<ShutdownHandler>,
        payload: Vec<u8>,
    ) -> Result<(), anyhow::Error>;
}

/// Implement the [`MessageProcessor`] trait for all Boxed processors.
///
/// E.g. Box<dyn MessageProcessor>.
#[async_trait::async_trait]
impl<P> MessageProcessor for Box<P>
where
    P: MessageProcessor + ?Sized,
{
    async fn process(
        &self,
        shutdown: Arc<ShutdownHandler>,
        payload: Vec<u8>,
    ) -> Result<(), anyhow::Error> {
        P::process(self, shutdown, payload).await
    }
}

/// Wrapper type to turn an async closure into a [`MessageProcessor`].
///
/// We do not require closures to return an [`anyhow::Error`] directly - any error type that can
/// be converted into one will do.
pub struct ClosureProcessor<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut, E> MessageProcessor for ClosureProcessor<F>
where
    F: Fn(Arc<ShutdownHandler>, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
{
    async fn process(
        &self,
        shutdown: Arc<ShutdownHandler>,
        payload: Vec<u8>,
    ) -> Result<(), anyhow::Error> {
        (self.0)(shutdown, payload).await.map_err(Into::into)
    }
}

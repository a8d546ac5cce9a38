//! The broker verbs a [`Processor`](crate::consumers::Processor) relies on.
//!
//! `TransportFactory` → [`Connection`] → [`Channel`] mirrors the way an AMQP client is layered:
//! a physical connection multiplexes logical channels, and consumers live on channels.
//! The traits are implemented for [`lapin`]'s types; tests can swap in an in-memory broker.
use crate::consumers::{Acker, Delivery};
use amq_protocol_types::FieldTable;
use futures_util::stream::{BoxStream, StreamExt};
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions};

/// The stream of deliveries pushed by the broker to a registered consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, anyhow::Error>>;

/// `TransportFactory` defines an interface for types that are capable of opening a connection
/// to a broker, given its address.
///
/// # Note
///
/// Whether a new connection is established or an existing one is returned is up to the
/// specific implementation. [`ConnectionFactory`](crate::amqp::ConnectionFactory) always
/// dials a new one.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Connection: Connection;

    /// Fails if the broker is unreachable or rejects the connection.
    async fn connect(&self, address: &str) -> Result<Self::Connection, anyhow::Error>;
}

/// A physical connection to a broker.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    type Channel: Channel;

    /// Open a new logical channel over this connection.
    async fn create_channel(&self) -> Result<Self::Channel, anyhow::Error>;

    /// Close the connection, releasing every channel opened over it.
    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// A logical channel, used to register and cancel consumers.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Cap the number of unacknowledged deliveries the broker pushes to consumers on this channel.
    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error>;

    /// Register a consumer named `consumer_tag` on `queue`.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, anyhow::Error>;

    /// Unsubscribe the consumer named `consumer_tag`.
    async fn basic_cancel(
        &self,
        consumer_tag: &str,
        options: BasicCancelOptions,
    ) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Connection for lapin::Connection {
    type Channel = lapin::Channel;

    #[tracing::instrument(name = "rabbitmq_create_channel", skip_all)]
    async fn create_channel(&self) -> Result<Self::Channel, anyhow::Error> {
        Ok(lapin::Connection::create_channel(self).await?)
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        Ok(lapin::Connection::close(self, 200, "OK").await?)
    }
}

#[async_trait::async_trait]
impl Channel for lapin::Channel {
    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error> {
        Ok(lapin::Channel::basic_qos(self, prefetch_count, options).await?)
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, anyhow::Error> {
        let consumer =
            lapin::Channel::basic_consume(self, queue, consumer_tag, options, arguments).await?;
        Ok(consumer
            .map(|event| event.map(Delivery::from).map_err(anyhow::Error::from))
            .boxed())
    }

    async fn basic_cancel(
        &self,
        consumer_tag: &str,
        options: BasicCancelOptions,
    ) -> Result<(), anyhow::Error> {
        Ok(lapin::Channel::basic_cancel(self, consumer_tag, options).await?)
    }
}

#[async_trait::async_trait]
impl Acker for lapin::acker::Acker {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), anyhow::Error> {
        lapin::acker::Acker::ack(self, options)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    }
}

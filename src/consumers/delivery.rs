use amq_protocol_types::DeliveryTag;
use lapin::options::BasicAckOptions;

/// Settles a delivery with the broker.
///
/// Implemented for [`lapin::acker::Acker`]; in-memory brokers provide their own.
#[async_trait::async_trait]
pub trait Acker: Send + Sync + 'static {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), anyhow::Error>;
}

/// A message received from a queue, waiting for an acknowledgment decision.
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,

    /// The `message_id` property, if the publisher set one.
    pub message_id: Option<String>,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,

    // Hidden from the message processor: only the processor loop settles deliveries, and
    // AMQP forbids acking the same delivery tag twice.
    pub(crate) acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(delivery_tag: DeliveryTag, data: Vec<u8>, acker: impl Acker) -> Self {
        Self {
            delivery_tag,
            message_id: None,
            redelivered: false,
            data,
            acker: Box::new(acker),
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("message_id", &self.message_id)
            .field("redelivered", &self.redelivered)
            .field("data", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            message_id: value
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_owned()),
            redelivered: value.redelivered,
            data: value.data,
            acker: Box::new(value.acker),
        }
    }
}

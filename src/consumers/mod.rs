//! Facilities to consume messages from a RabbitMq queue. Check out [`Processor`] as a
//! starting point.
pub use builder::ProcessorBuilder;
pub use delivery::{Acker, Delivery};
pub use error::{ProcessingError, ProcessorError};
pub use handler::{ClosureProcessor, MessageProcessor};
pub use processor::Processor;

mod builder;
mod delivery;
mod error;
mod handler;
mod processor;

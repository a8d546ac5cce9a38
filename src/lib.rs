//! `amqp-worker` is the message-consumption core of a service, built on top of [`lapin`],
//! to pull messages from a RabbitMQ queue one at a time and hand them to your code.
//!
//! [`Processor`](crate::consumers::Processor) is the best starting point: it connects to the
//! broker, waits for a message or a shutdown signal, runs your
//! [`MessageProcessor`](crate::consumers::MessageProcessor) and acks the message if processing
//! succeeded.
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action.

pub mod amqp;
pub mod consumers;

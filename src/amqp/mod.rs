//! Helpers for connecting to a rabbitmq broker

pub mod configuration;
mod connection;
mod factory;
pub mod transport;

pub use connection::{redact_address, BrokerConnection};
pub use factory::ConnectionFactory;

pub use lapin::{options, types};

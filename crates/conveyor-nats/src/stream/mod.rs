//! Typed JetStream publishing and consumption.

mod publisher;
mod subscriber;

pub use publisher::StreamPublisher;
pub use subscriber::{ConsumerOptions, Delivery, DeliveryStream, StreamSubscriber};

//! PPM Bus Abstraction Layer
//!
//! This crate is the seam between the pipeline engine and the message
//! bus. The engine programs against two narrow capabilities and never
//! learns which backend it is talking to:
//!
//! - **Production**: Kafka via librdkafka (feature `kafka`)
//! - **Tests**: a scriptable in-memory bus
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ppm_env::{BsmConsumer, BusConnector, MemoryBus, Polled};
//!
//! let bus = MemoryBus::new();
//! bus.push_message(b"{}");
//!
//! let mut consumer = bus.connect_consumer().unwrap();
//! consumer.subscribe("topic.OdeBsmJson").unwrap();
//! assert!(matches!(
//!     consumer.poll(Duration::from_millis(5)),
//!     Polled::Message(_)
//! ));
//! ```

mod bus;
mod error;
mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use bus::{
    BsmConsumer, BsmProducer, BusConnector, InboundMessage, MessageTimestamp, Polled,
};
pub use error::BusError;
pub use memory::{MemoryBus, Produced};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConnector, KafkaSettings, StartOffset};

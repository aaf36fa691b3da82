//! Bus consumer/producer capabilities.
//!
//! The pipeline engine sees the message bus through two narrow traits so
//! the same engine runs against a real broker or an in-memory fake.
//!
//! # Contract
//!
//! The engine is single-threaded and cooperative; both traits are
//! synchronous. `poll` blocks for at most the given timeout, `produce`
//! queues and returns. Throughput comes from batching inside the client,
//! not from concurrency at this seam.
//!
//! ```text
//! Broker                  Engine                       Broker
//!   |                        |                            |
//!   |<-- poll(timeout) ----- |                            |
//!   |--- Polled::Message --->| filter / redact            |
//!   |                        |--- produce(topic, bytes) ->|
//! ```

use std::time::Duration;

use crate::error::BusError;

/// When the broker stamped an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTimestamp {
    /// The broker supplied no timestamp.
    NotAvailable,
    /// Producer-assigned creation time, epoch milliseconds.
    CreateTime(i64),
    /// Broker-assigned append time, epoch milliseconds.
    LogAppendTime(i64),
}

/// One message pulled from the inbound topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The raw payload bytes.
    pub payload: Vec<u8>,
    /// Partition the message was read from.
    pub partition: i32,
    /// Message offset within the partition.
    pub offset: i64,
    /// Message key, when one was set.
    pub key: Option<String>,
    /// Broker timestamp.
    pub timestamp: MessageTimestamp,
}

impl InboundMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// The outcome of a single consumer poll.
#[derive(Debug, Clone)]
pub enum Polled {
    /// A message arrived.
    Message(InboundMessage),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The consumer reached the current end of a partition.
    PartitionEof {
        /// The partition that reported EOF.
        partition: i32,
    },
    /// The stream is gone; the engine should drain.
    Unavailable(BusError),
}

/// Consuming side of the bus.
pub trait BsmConsumer: Send {
    /// Subscribes to (or assigns) the inbound topic.
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError>;

    /// True when broker metadata currently advertises the topic.
    fn topic_available(&self, topic: &str) -> Result<bool, BusError>;

    /// Number of partitions the topic has, per broker metadata.
    fn partition_count(&self, topic: &str) -> Result<usize, BusError>;

    /// Pulls the next outcome, blocking for at most `timeout`.
    fn poll(&mut self, timeout: Duration) -> Polled;

    /// Releases the subscription.
    fn close(&mut self);
}

/// Producing side of the bus.
pub trait BsmProducer: Send {
    /// Queues a copy of `payload` onto the topic with no key.
    ///
    /// `None` for the partition lets the bus client assign one.
    fn produce(
        &mut self,
        topic: &str,
        partition: Option<i32>,
        payload: &[u8],
    ) -> Result<(), BusError>;

    /// Blocks until queued messages are delivered or `timeout` passes.
    fn flush(&mut self, timeout: Duration);
}

/// Creates consumer/producer pairs for one configured bus.
///
/// The engine retries creation with backoff, so connectors must be
/// callable repeatedly.
pub trait BusConnector {
    /// Creates a consumer.
    fn connect_consumer(&self) -> Result<Box<dyn BsmConsumer>, BusError>;

    /// Creates a producer.
    fn connect_producer(&self) -> Result<Box<dyn BsmProducer>, BusError>;
}

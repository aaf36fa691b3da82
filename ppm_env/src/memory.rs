//! In-memory bus - channel-backed consumer/producer for tests.
//!
//! Scriptable stand-in for a real broker: tests queue inbound events
//! (messages, EOF markers, injected errors), then inspect what the
//! engine produced. Fault hooks cover the launch paths too: connector
//! failures, deferred topic metadata, and failing produce calls.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::bus::{
    BsmConsumer, BsmProducer, BusConnector, InboundMessage, MessageTimestamp, Polled,
};
use crate::error::BusError;

/// A record captured by the in-memory producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Produced {
    /// Topic the record was produced to.
    pub topic: String,
    /// Partition requested by the caller.
    pub partition: Option<i32>,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

struct Shared {
    produced: Mutex<Vec<Produced>>,
    next_offset: AtomicI64,
    partitions: AtomicUsize,
    /// `topic_available` answers false this many more times.
    topic_deferrals: AtomicUsize,
    /// `connect_consumer` fails this many more times.
    consumer_connect_failures: AtomicUsize,
    /// `connect_producer` fails this many more times.
    producer_connect_failures: AtomicUsize,
    /// `produce` fails this many more times.
    produce_failures: AtomicUsize,
}

/// A scriptable in-memory message bus.
#[derive(Clone)]
pub struct MemoryBus {
    tx: Sender<Polled>,
    rx: Receiver<Polled>,
    shared: Arc<Shared>,
}

impl MemoryBus {
    /// Creates an empty bus with one partition.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            shared: Arc::new(Shared {
                produced: Mutex::new(Vec::new()),
                next_offset: AtomicI64::new(0),
                partitions: AtomicUsize::new(1),
                topic_deferrals: AtomicUsize::new(0),
                consumer_connect_failures: AtomicUsize::new(0),
                producer_connect_failures: AtomicUsize::new(0),
                produce_failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Queues an inbound message on partition 0.
    pub fn push_message(&self, payload: &[u8]) {
        let offset = self.shared.next_offset.fetch_add(1, Ordering::Relaxed);
        self.push_event(Polled::Message(InboundMessage {
            payload: payload.to_vec(),
            partition: 0,
            offset,
            key: None,
            timestamp: MessageTimestamp::NotAvailable,
        }));
    }

    /// Queues an EOF marker for a partition.
    pub fn push_eof(&self, partition: i32) {
        self.push_event(Polled::PartitionEof { partition });
    }

    /// Queues an arbitrary poll outcome.
    pub fn push_event(&self, event: Polled) {
        // Send can only fail when every receiver is gone; tests hold one.
        let _ = self.tx.send(event);
    }

    /// Makes `topic_available` answer false for the next `polls` calls.
    pub fn defer_topic(&self, polls: usize) {
        self.shared.topic_deferrals.store(polls, Ordering::Relaxed);
    }

    /// Makes the next `n` consumer connections fail.
    pub fn fail_consumer_connects(&self, n: usize) {
        self.shared
            .consumer_connect_failures
            .store(n, Ordering::Relaxed);
    }

    /// Makes the next `n` producer connections fail.
    pub fn fail_producer_connects(&self, n: usize) {
        self.shared
            .producer_connect_failures
            .store(n, Ordering::Relaxed);
    }

    /// Makes the next `n` produce calls fail.
    pub fn fail_produces(&self, n: usize) {
        self.shared.produce_failures.store(n, Ordering::Relaxed);
    }

    /// Sets the partition count reported from metadata.
    pub fn set_partitions(&self, n: usize) {
        self.shared.partitions.store(n, Ordering::Relaxed);
    }

    /// Everything produced so far.
    pub fn produced(&self) -> Vec<Produced> {
        self.shared.produced.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusConnector for MemoryBus {
    fn connect_consumer(&self) -> Result<Box<dyn BsmConsumer>, BusError> {
        if take_one(&self.shared.consumer_connect_failures) {
            return Err(BusError::Create("scripted consumer failure".to_string()));
        }
        Ok(Box::new(MemoryConsumer {
            rx: self.rx.clone(),
            shared: self.shared.clone(),
        }))
    }

    fn connect_producer(&self) -> Result<Box<dyn BsmProducer>, BusError> {
        if take_one(&self.shared.producer_connect_failures) {
            return Err(BusError::Create("scripted producer failure".to_string()));
        }
        Ok(Box::new(MemoryProducer {
            shared: self.shared.clone(),
        }))
    }
}

/// Decrements a scripted failure budget, true while budget remains.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        .is_ok()
}

struct MemoryConsumer {
    rx: Receiver<Polled>,
    shared: Arc<Shared>,
}

impl BsmConsumer for MemoryConsumer {
    fn subscribe(&mut self, _topic: &str) -> Result<(), BusError> {
        Ok(())
    }

    fn topic_available(&self, _topic: &str) -> Result<bool, BusError> {
        Ok(!take_one(&self.shared.topic_deferrals))
    }

    fn partition_count(&self, _topic: &str) -> Result<usize, BusError> {
        Ok(self.shared.partitions.load(Ordering::Relaxed))
    }

    fn poll(&mut self, timeout: Duration) -> Polled {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => Polled::Timeout,
            Err(RecvTimeoutError::Disconnected) => Polled::Unavailable(BusError::Closed),
        }
    }

    fn close(&mut self) {}
}

struct MemoryProducer {
    shared: Arc<Shared>,
}

impl BsmProducer for MemoryProducer {
    fn produce(
        &mut self,
        topic: &str,
        partition: Option<i32>,
        payload: &[u8],
    ) -> Result<(), BusError> {
        if take_one(&self.shared.produce_failures) {
            return Err(BusError::produce("scripted produce failure"));
        }
        self.shared
            .produced
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Produced {
                topic: topic.to_string(),
                partition,
                payload: payload.to_vec(),
            });
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_messages_in_order() {
        let bus = MemoryBus::new();
        bus.push_message(b"one");
        bus.push_message(b"two");
        bus.push_eof(0);

        let mut consumer = bus.connect_consumer().unwrap();
        let timeout = Duration::from_millis(10);

        match consumer.poll(timeout) {
            Polled::Message(m) => {
                assert_eq!(m.payload, b"one");
                assert_eq!(m.offset, 0);
            }
            other => panic!("expected message, got {other:?}"),
        }
        match consumer.poll(timeout) {
            Polled::Message(m) => assert_eq!(m.offset, 1),
            other => panic!("expected message, got {other:?}"),
        }
        assert!(matches!(
            consumer.poll(timeout),
            Polled::PartitionEof { partition: 0 }
        ));
        assert!(matches!(consumer.poll(timeout), Polled::Timeout));
    }

    #[test]
    fn test_producer_records() {
        let bus = MemoryBus::new();
        let mut producer = bus.connect_producer().unwrap();
        producer.produce("out", Some(3), b"payload").unwrap();

        let produced = bus.produced();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].topic, "out");
        assert_eq!(produced[0].partition, Some(3));
        assert_eq!(produced[0].payload, b"payload");
    }

    #[test]
    fn test_fault_budgets() {
        let bus = MemoryBus::new();
        bus.fail_consumer_connects(1);
        assert!(bus.connect_consumer().is_err());
        assert!(bus.connect_consumer().is_ok());

        bus.fail_produces(1);
        let mut producer = bus.connect_producer().unwrap();
        assert!(producer.produce("out", None, b"x").is_err());
        assert!(producer.produce("out", None, b"x").is_ok());

        bus.defer_topic(2);
        let consumer = bus.connect_consumer().unwrap();
        assert!(!consumer.topic_available("in").unwrap());
        assert!(!consumer.topic_available("in").unwrap());
        assert!(consumer.topic_available("in").unwrap());
    }
}

//! Pipeline engine - the long-lived consume → filter → produce loop.
//!
//! One engine owns one consumer/producer pair and a built filter policy.
//! The outer bootstrap loop (re)establishes the stream: create the
//! consumer, wait for the inbound topic to appear in broker metadata,
//! subscribe, create the producer. The inner loop polls one message at a
//! time, runs the filter, and either produces the survivor or counts the
//! suppression. Transport faults tear the stream down and fall back to
//! the bootstrap loop; a terminate signal or exhausted partitions (with
//! `--exit`) end the run.
//!
//! Two flags steer everything, both written by the signal handler and
//! read at the top of each loop iteration:
//! - `stream_down`: drains the current stream
//! - `shutdown`: stops the bootstrap loop
//!
//! The engine is single-threaded; it blocks only in `poll`, the producer
//! flush, and the reconnect pause.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, trace, warn};

use ppm_core::{Bsm, Decision, FilterPolicy, PolicyConfig, SuppressReason};
use ppm_env::{
    BsmConsumer, BsmProducer, BusConnector, BusError, InboundMessage, MessageTimestamp, Polled,
};

/// Pause before retrying a failed launch or re-polling topic metadata.
pub const RECONNECT_PAUSE: Duration = Duration::from_millis(1500);

/// How long the final producer flush may block.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Monotonic counters owned by the engine thread.
///
/// At every loop boundary `recv_msgs == sent_msgs + filt_msgs +
/// produce_errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Messages pulled from the inbound topic.
    pub recv_msgs: u64,
    /// Bytes pulled from the inbound topic.
    pub recv_bytes: u64,
    /// Messages produced onto the outbound topic.
    pub sent_msgs: u64,
    /// Bytes produced onto the outbound topic.
    pub sent_bytes: u64,
    /// Messages suppressed by the filter (parse failures included).
    pub filt_msgs: u64,
    /// Bytes suppressed by the filter.
    pub filt_bytes: u64,
    /// Distinct partitions that have reported EOF.
    pub eof_partitions: u64,
    /// Retained messages lost to produce failures.
    pub produce_errors: u64,
}

impl Counters {
    /// Every received message is accounted for exactly once.
    pub fn is_balanced(&self) -> bool {
        self.recv_msgs == self.sent_msgs + self.filt_msgs + self.produce_errors
    }
}

/// The privacy-filter pipeline engine.
///
/// Generic over the bus connector so the same engine runs against Kafka
/// in production and the in-memory bus in tests.
pub struct Engine<C: BusConnector> {
    connector: C,
    config: PolicyConfig,
    policy: FilterPolicy,
    counters: Counters,
    /// True drains the current stream. Signal handler writes, loops read.
    stream_down: Arc<AtomicBool>,
    /// True stops the bootstrap loop. Signal handler writes, loops read.
    shutdown: Arc<AtomicBool>,
    eof_seen: HashSet<i32>,
    partition_count: usize,
    reconnect_pause: Duration,
}

impl<C: BusConnector> Engine<C> {
    /// Creates an engine from resolved configuration, a built policy,
    /// and a bus connector.
    pub fn new(config: PolicyConfig, policy: FilterPolicy, connector: C) -> Self {
        Self {
            connector,
            config,
            policy,
            counters: Counters::default(),
            stream_down: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            eof_seen: HashSet::new(),
            partition_count: 1,
            reconnect_pause: RECONNECT_PAUSE,
        }
    }

    /// Shortens the reconnect pause; tests use this to keep fault
    /// scenarios fast.
    pub fn with_reconnect_pause(mut self, pause: Duration) -> Self {
        self.reconnect_pause = pause;
        self
    }

    /// The flag that stops the bootstrap loop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// The flag that drains the current stream.
    pub fn stream_down_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stream_down)
    }

    /// Counters as of the last loop boundary.
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Runs the pipeline until shutdown, then reports and returns the
    /// final counters.
    pub fn run(&mut self) -> Counters {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.stream_down.store(false, Ordering::Relaxed);

            let (mut consumer, mut producer) = match self.launch() {
                Ok(pair) => pair,
                Err(e) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    error!(
                        "launch failed: {}; retrying in {} ms",
                        e,
                        self.reconnect_pause.as_millis()
                    );
                    std::thread::sleep(self.reconnect_pause);
                    continue;
                }
            };

            self.eof_seen.clear();
            self.process_stream(consumer.as_mut(), producer.as_mut());

            producer.flush(FLUSH_TIMEOUT);
            consumer.close();
        }

        self.report();
        self.counters
    }

    /// Establishes the stream: consumer, topic wait, subscription,
    /// partition count, producer.
    fn launch(
        &mut self,
    ) -> Result<(Box<dyn BsmConsumer>, Box<dyn BsmProducer>), BusError> {
        let topic = self.config.consumer_topic.clone();
        let mut consumer = self.connector.connect_consumer()?;

        // Wait until broker metadata advertises the inbound topic.
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(BusError::Closed);
            }
            match consumer.topic_available(&topic) {
                Ok(true) => {
                    info!("topic {} found in the broker metadata", topic);
                    break;
                }
                Ok(false) => warn!("metadata does not contain topic {} yet", topic),
                Err(e) => error!("cannot retrieve consumer metadata: {}", e),
            }
            std::thread::sleep(self.reconnect_pause);
        }

        consumer.subscribe(&topic)?;

        self.partition_count = match consumer.partition_count(&topic) {
            Ok(n) if n > 0 => n,
            Ok(_) | Err(_) => {
                warn!("could not determine partition count for {}; assuming 1", topic);
                1
            }
        };
        info!(
            "consumer created using topic {} with {} partition(s)",
            topic, self.partition_count
        );

        let producer = self.connector.connect_producer()?;
        info!(
            "producer created using topic {}",
            self.config.producer_topic
        );

        Ok((consumer, producer))
    }

    /// The per-message loop; returns when the stream goes down or a
    /// shutdown is requested.
    fn process_stream(
        &mut self,
        consumer: &mut dyn BsmConsumer,
        producer: &mut dyn BsmProducer,
    ) {
        let timeout = Duration::from_millis(self.config.consumer_timeout_ms);

        while !self.stream_down.load(Ordering::Relaxed)
            && !self.shutdown.load(Ordering::Relaxed)
        {
            match consumer.poll(timeout) {
                Polled::Timeout => {
                    trace!("waiting for BSMs on {}", self.config.consumer_topic);
                }
                Polled::Message(message) => self.handle_message(message, producer),
                Polled::PartitionEof { partition } => self.handle_eof(partition),
                Polled::Unavailable(e) => {
                    error!("cannot consume from {}: {}", self.config.consumer_topic, e);
                    self.stream_down.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    fn handle_message(&mut self, message: InboundMessage, producer: &mut dyn BsmProducer) {
        self.counters.recv_msgs += 1;
        self.counters.recv_bytes += message.len() as u64;

        trace!(
            "read message at offset {} on partition {}",
            message.offset,
            message.partition
        );
        match message.timestamp {
            MessageTimestamp::CreateTime(t) => trace!("message timestamp: create time {}", t),
            MessageTimestamp::LogAppendTime(t) => {
                trace!("message timestamp: log append time {}", t);
            }
            MessageTimestamp::NotAvailable => {}
        }
        if let Some(key) = &message.key {
            trace!("message key: {}", key);
        }

        let mut bsm = match Bsm::from_slice(&message.payload) {
            Ok(bsm) => bsm,
            Err(e) => {
                info!(
                    "BSM [SUPPRESSED-{}]: {}",
                    SuppressReason::Parse,
                    e
                );
                self.counters.filt_msgs += 1;
                self.counters.filt_bytes += message.len() as u64;
                return;
            }
        };

        match self.policy.apply(&mut bsm) {
            decision @ (Decision::Retain | Decision::Redact) => {
                info!("BSM [RETAINED]: {}", bsm.log_string());
                self.produce(&mut bsm, decision, producer);
            }
            Decision::Suppress(reason) => {
                info!("BSM [SUPPRESSED-{}]: {}", reason, bsm.log_string());
                self.counters.filt_msgs += 1;
                self.counters.filt_bytes += message.len() as u64;
            }
        }
    }

    fn produce(&mut self, bsm: &mut Bsm, decision: Decision, producer: &mut dyn BsmProducer) {
        let payload = match bsm.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialise retained BSM: {}", e);
                self.counters.produce_errors += 1;
                return;
            }
        };

        match producer.produce(
            &self.config.producer_topic,
            self.config.partition,
            &payload,
        ) {
            Ok(()) => {
                self.counters.sent_msgs += 1;
                self.counters.sent_bytes += payload.len() as u64;
                trace!("produced {:?} BSM successfully", decision);
            }
            Err(e) => {
                error!("failed to produce retained BSM: {}", e);
                self.counters.produce_errors += 1;
            }
        }
    }

    fn handle_eof(&mut self, partition: i32) {
        info!(
            "consumer partition {} end of file, but the engine is still alive",
            partition
        );
        if self.eof_seen.insert(partition) {
            self.counters.eof_partitions = self.eof_seen.len() as u64;
        }
        if self.config.exit_on_eof && self.eof_seen.len() >= self.partition_count {
            info!("EOF reached for all {} partition(s)", self.partition_count);
            self.stream_down.store(true, Ordering::Relaxed);
            self.shutdown.store(true, Ordering::Relaxed);
        }
    }

    fn report(&self) {
        info!("PPM operations complete; shutting down...");
        info!(
            "PPM consumed  : {} BSMs and {} bytes",
            self.counters.recv_msgs, self.counters.recv_bytes
        );
        info!(
            "PPM published : {} BSMs and {} bytes",
            self.counters.sent_msgs, self.counters.sent_bytes
        );
        info!(
            "PPM suppressed: {} BSMs and {} bytes",
            self.counters.filt_msgs, self.counters.filt_bytes
        );
    }
}

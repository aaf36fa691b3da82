//! Kafka bus backend over librdkafka.
//!
//! Production implementation of the bus capabilities. The consumer runs
//! with `enable.partition.eof` so the engine sees end-of-partition
//! markers; the producer copies payloads and sets no key.
//!
//! Confluent Cloud wiring: when `KAFKA_TYPE=CONFLUENT` the client is
//! pointed at `DOCKER_HOST_IP` with SASL/SSL credentials taken from
//! `CONFLUENT_KEY` / `CONFLUENT_SECRET`.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::{Message, Offset, Timestamp, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::bus::{
    BsmConsumer, BsmProducer, BusConnector, InboundMessage, MessageTimestamp, Polled,
};
use crate::error::BusError;

/// Metadata fetch timeout.
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Earliest available message.
    Beginning,
    /// Only new messages.
    End,
    /// The broker-stored offset for the group.
    Stored,
    /// An explicit message offset.
    Numeric(i64),
}

impl StartOffset {
    fn to_offset(self) -> Offset {
        match self {
            Self::Beginning => Offset::Beginning,
            Self::End => Offset::End,
            Self::Stored => Offset::Stored,
            Self::Numeric(n) => Offset::Offset(n),
        }
    }
}

/// Connection settings for the Kafka backend.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Broker list, `host:port,...`.
    pub brokers: String,
    /// Consumer group id.
    pub group_id: Option<String>,
    /// Start offset in the consumed topic.
    pub start_offset: StartOffset,
    /// Explicit partition assignment; `None` subscribes group-managed.
    pub assigned_partition: Option<i32>,
    /// librdkafka debug facets, comma-separated.
    pub debug_facets: Option<String>,
    /// Raw client settings forwarded from the configuration file.
    pub overrides: Vec<(String, String)>,
}

/// Creates Kafka consumers and producers from one settings block.
pub struct KafkaConnector {
    settings: KafkaSettings,
}

impl KafkaConnector {
    /// Creates a connector; clients are built per `connect_*` call.
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("metadata.broker.list", &self.settings.brokers);

        for (key, value) in &self.settings.overrides {
            config.set(key, value);
        }

        if let Some(facets) = &self.settings.debug_facets {
            config.set("debug", facets);
        }

        // Confluent Cloud integration.
        if env_var("KAFKA_TYPE").as_deref() == Some("CONFLUENT") {
            info!("configuring client for Confluent Cloud");
            config.set("bootstrap.servers", env_var("DOCKER_HOST_IP").unwrap_or_default());
            config.set("security.protocol", "SASL_SSL");
            config.set("sasl.mechanisms", "PLAIN");
            config.set("sasl.username", env_var("CONFLUENT_KEY").unwrap_or_default());
            config.set("sasl.password", env_var("CONFLUENT_SECRET").unwrap_or_default());
            config.set("api.version.request", "true");
            config.set("api.version.fallback.ms", "0");
            config.set("broker.version.fallback", "0.10.0.0");
        }

        config
    }
}

fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

impl BusConnector for KafkaConnector {
    fn connect_consumer(&self) -> Result<Box<dyn BsmConsumer>, BusError> {
        let mut config = self.client_config();
        config.set("enable.partition.eof", "true");
        if let Some(group) = &self.settings.group_id {
            config.set("group.id", group);
        }

        let inner: BaseConsumer = config
            .create()
            .map_err(|e| BusError::Create(e.to_string()))?;
        Ok(Box::new(KafkaBsmConsumer {
            inner,
            settings: self.settings.clone(),
        }))
    }

    fn connect_producer(&self) -> Result<Box<dyn BsmProducer>, BusError> {
        let inner: BaseProducer = self
            .client_config()
            .create()
            .map_err(|e| BusError::Create(e.to_string()))?;
        Ok(Box::new(KafkaBsmProducer { inner }))
    }
}

struct KafkaBsmConsumer {
    inner: BaseConsumer,
    settings: KafkaSettings,
}

impl BsmConsumer for KafkaBsmConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        let explicit_offset = !matches!(self.settings.start_offset, StartOffset::Stored);
        if let (Some(partition), true) = (self.settings.assigned_partition, explicit_offset) {
            // A pinned partition with a concrete offset needs a manual
            // assignment; group subscription ignores both.
            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(topic, partition, self.settings.start_offset.to_offset())
                .map_err(|e| BusError::Subscribe(e.to_string()))?;
            self.inner
                .assign(&assignment)
                .map_err(|e| BusError::Subscribe(e.to_string()))?;
            debug!(
                "assigned topic {} partition {} at {:?}",
                topic, partition, self.settings.start_offset
            );
        } else {
            self.inner
                .subscribe(&[topic])
                .map_err(|e| BusError::Subscribe(e.to_string()))?;
            debug!("subscribed to topic {}", topic);
        }
        Ok(())
    }

    fn topic_available(&self, topic: &str) -> Result<bool, BusError> {
        let metadata = self
            .inner
            .fetch_metadata(None, METADATA_TIMEOUT)
            .map_err(|e| BusError::transport(e.to_string()))?;
        Ok(metadata.topics().iter().any(|t| t.name() == topic))
    }

    fn partition_count(&self, topic: &str) -> Result<usize, BusError> {
        let metadata = self
            .inner
            .fetch_metadata(Some(topic), METADATA_TIMEOUT)
            .map_err(|e| BusError::transport(e.to_string()))?;
        metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().len())
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))
    }

    fn poll(&mut self, timeout: Duration) -> Polled {
        match self.inner.poll(timeout) {
            None => Polled::Timeout,
            Some(Ok(message)) => Polled::Message(InboundMessage {
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                partition: message.partition(),
                offset: message.offset(),
                key: message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                timestamp: match message.timestamp() {
                    Timestamp::NotAvailable => MessageTimestamp::NotAvailable,
                    Timestamp::CreateTime(t) => MessageTimestamp::CreateTime(t),
                    Timestamp::LogAppendTime(t) => MessageTimestamp::LogAppendTime(t),
                },
            }),
            Some(Err(KafkaError::PartitionEOF(partition))) => Polled::PartitionEof { partition },
            Some(Err(KafkaError::MessageConsumption(code))) => match code {
                RDKafkaErrorCode::UnknownTopic | RDKafkaErrorCode::UnknownTopicOrPartition => {
                    Polled::Unavailable(BusError::UnknownTopic(code.to_string()))
                }
                RDKafkaErrorCode::UnknownPartition => {
                    Polled::Unavailable(BusError::UnknownPartition(code.to_string()))
                }
                other => Polled::Unavailable(BusError::transport(other.to_string())),
            },
            Some(Err(other)) => Polled::Unavailable(BusError::transport(other.to_string())),
        }
    }

    fn close(&mut self) {
        self.inner.unsubscribe();
    }
}

struct KafkaBsmProducer {
    inner: BaseProducer,
}

impl BsmProducer for KafkaBsmProducer {
    fn produce(
        &mut self,
        topic: &str,
        partition: Option<i32>,
        payload: &[u8],
    ) -> Result<(), BusError> {
        let mut record = BaseRecord::<(), [u8]>::to(topic).payload(payload);
        if let Some(p) = partition {
            record = record.partition(p);
        }
        self.inner
            .send(record)
            .map_err(|(e, _)| BusError::produce(e.to_string()))?;
        // Serve delivery callbacks without blocking.
        self.inner.poll(Duration::ZERO);
        Ok(())
    }

    fn flush(&mut self, timeout: Duration) {
        if let Err(e) = self.inner.flush(timeout) {
            warn!("producer flush incomplete: {}", e);
        }
    }
}

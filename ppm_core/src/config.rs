//! Configuration - key=value file loading and the resolved policy.
//!
//! The configuration file is UTF-8, one `key=value` per line; `#` at the
//! start of a line opens a comment and blank lines are ignored. Keys under
//! the `privacy.` prefix configure this module; everything else is
//! forwarded untouched to the bus client.
//!
//! Command-line options override file values; file values override the
//! built-in defaults.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::geo::{BoundingBox, Point};

/// Default broker list when neither file nor CLI names one.
pub const DEFAULT_BROKERS: &str = "localhost";

/// Default consumer poll timeout in milliseconds.
pub const DEFAULT_CONSUMER_TIMEOUT_MS: u64 = 500;

/// Default lower velocity bound (m/s), roughly 5 mph.
pub const DEFAULT_VELOCITY_MIN: f64 = 2.235;

/// Default upper velocity bound (m/s), roughly 80 mph.
pub const DEFAULT_VELOCITY_MAX: f64 = 35.763;

/// Default replacement for redacted vehicle identifiers.
pub const DEFAULT_REDACTION_VALUE: &str = "FFFFFFFF";

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// A non-comment line was not a single `key=value` pair.
    #[error("malformed configuration at line {line}: {text}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// The offending line.
        text: String,
    },

    /// A required setting was supplied by neither the file nor the CLI.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A setting was present but unusable.
    #[error("invalid value for {key}: {value}")]
    Invalid {
        /// The configuration key.
        key: String,
        /// The rejected value.
        value: String,
    },
}

/// Where the consumer starts reading in the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    /// Earliest available message.
    Beginning,
    /// Only messages produced after subscription.
    End,
    /// The broker-stored offset for the consumer group.
    Stored,
    /// An explicit message offset.
    Numeric(i64),
}

impl Default for OffsetSpec {
    fn default() -> Self {
        Self::Beginning
    }
}

impl FromStr for OffsetSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginning" => Ok(Self::Beginning),
            "end" => Ok(Self::End),
            "stored" => Ok(Self::Stored),
            other => other
                .parse::<i64>()
                .map(Self::Numeric)
                .map_err(|_| format!("not an offset: {other}")),
        }
    }
}

impl std::fmt::Display for OffsetSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Beginning => f.write_str("beginning"),
            Self::End => f.write_str("end"),
            Self::Stored => f.write_str("stored"),
            Self::Numeric(n) => write!(f, "{n}"),
        }
    }
}

/// The raw key=value pairs from a configuration file, in file order.
#[derive(Debug, Clone, Default)]
pub struct KvConfig {
    pairs: Vec<(String, String)>,
}

impl KvConfig {
    /// Loads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut pairs = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (key, value) = trimmed.split_once('=').ok_or_else(|| ConfigError::Malformed {
                line: idx + 1,
                text: trimmed.to_string(),
            })?;
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self { pairs })
    }

    /// Builds a configuration directly from pairs.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Last value for a key, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Keys under the `privacy.` prefix, in file order.
    pub fn policy_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .filter(|(k, _)| k.starts_with("privacy."))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys forwarded to the bus client, in file order.
    pub fn bus_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .filter(|(k, _)| !k.starts_with("privacy."))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Settings a caller (typically the CLI) may force over file values.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Mapfile path.
    pub mapfile: Option<PathBuf>,
    /// Inbound (unfiltered) topic.
    pub consumer_topic: Option<String>,
    /// Outbound (filtered) topic.
    pub producer_topic: Option<String>,
    /// Partition to produce to.
    pub partition: Option<i32>,
    /// Start offset.
    pub offset: Option<OffsetSpec>,
    /// Broker list.
    pub brokers: Option<String>,
    /// Consumer group id.
    pub group_id: Option<String>,
    /// Bus-client debug facets.
    pub debug_facets: Option<String>,
    /// Stop when every partition reports EOF.
    pub exit_on_eof: bool,
}

/// The resolved, immutable policy configuration.
///
/// Built once during configuration; read-only afterwards.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Lower velocity bound (m/s), inclusive.
    pub velocity_min: f64,
    /// Upper velocity bound (m/s), inclusive.
    pub velocity_max: f64,
    /// Identifiers matching this pattern are redacted.
    pub id_inclusion_pattern: Option<String>,
    /// Replacement identifier for redacted messages.
    pub id_redaction_value: String,
    /// The geofence rectangle.
    pub geofence: BoundingBox,
    /// Shape CSV for the geofence.
    pub mapfile: PathBuf,
    /// Inbound topic.
    pub consumer_topic: String,
    /// Outbound topic.
    pub producer_topic: String,
    /// Partition to produce to; `None` lets the bus client assign.
    pub partition: Option<i32>,
    /// Start offset in the consumed topic.
    pub offset: OffsetSpec,
    /// Broker list, `host:port,...`.
    pub brokers: String,
    /// Consumer group id.
    pub group_id: Option<String>,
    /// Consumer poll timeout in milliseconds.
    pub consumer_timeout_ms: u64,
    /// Bus-client debug facets.
    pub debug_facets: Option<String>,
    /// Stop when every partition reports EOF.
    pub exit_on_eof: bool,
    /// Non-`privacy.` keys forwarded to the bus client.
    pub bus_overrides: Vec<(String, String)>,
}

impl PolicyConfig {
    /// Resolves the effective configuration from file pairs and caller
    /// overrides. Overrides win; defaults fill the rest; required
    /// settings missing from both fail.
    pub fn resolve(kv: &KvConfig, overrides: &Overrides) -> Result<Self, ConfigError> {
        let geofence = BoundingBox::new(
            Point::new(
                required_f64(kv, "privacy.filter.geofence.sw.lat")?,
                required_f64(kv, "privacy.filter.geofence.sw.lon")?,
            ),
            Point::new(
                required_f64(kv, "privacy.filter.geofence.ne.lat")?,
                required_f64(kv, "privacy.filter.geofence.ne.lon")?,
            ),
        );
        if !geofence.is_valid() {
            return Err(ConfigError::Invalid {
                key: "privacy.filter.geofence".to_string(),
                value: format!("sw={}, ne={}", geofence.sw, geofence.ne),
            });
        }

        let mapfile = overrides
            .mapfile
            .clone()
            .or_else(|| kv.get("privacy.filter.geofence.mapfile").map(PathBuf::from))
            .ok_or(ConfigError::Missing("privacy.filter.geofence.mapfile"))?;

        let consumer_topic = overrides
            .consumer_topic
            .clone()
            .or_else(|| kv.get("privacy.topic.consumer").map(String::from))
            .ok_or(ConfigError::Missing("privacy.topic.consumer"))?;

        let producer_topic = overrides
            .producer_topic
            .clone()
            .or_else(|| kv.get("privacy.topic.producer").map(String::from))
            .ok_or(ConfigError::Missing("privacy.topic.producer"))?;

        let partition = match overrides.partition {
            Some(p) => Some(p),
            None => optional_parse(kv, "privacy.kafka.partition")?,
        };

        let consumer_timeout_ms =
            optional_parse(kv, "privacy.consumer.timeout.ms")?.unwrap_or(DEFAULT_CONSUMER_TIMEOUT_MS);

        let velocity_min =
            optional_parse(kv, "privacy.filter.velocity.min")?.unwrap_or(DEFAULT_VELOCITY_MIN);
        let velocity_max =
            optional_parse(kv, "privacy.filter.velocity.max")?.unwrap_or(DEFAULT_VELOCITY_MAX);
        if velocity_min > velocity_max {
            return Err(ConfigError::Invalid {
                key: "privacy.filter.velocity".to_string(),
                value: format!("min {velocity_min} exceeds max {velocity_max}"),
            });
        }

        Ok(Self {
            velocity_min,
            velocity_max,
            id_inclusion_pattern: kv
                .get("privacy.redaction.id.inclusions")
                .map(String::from),
            id_redaction_value: kv
                .get("privacy.redaction.id.value")
                .unwrap_or(DEFAULT_REDACTION_VALUE)
                .to_string(),
            geofence,
            mapfile,
            consumer_topic,
            producer_topic,
            partition,
            offset: overrides.offset.unwrap_or_default(),
            brokers: overrides
                .brokers
                .clone()
                .unwrap_or_else(|| DEFAULT_BROKERS.to_string()),
            group_id: overrides.group_id.clone(),
            consumer_timeout_ms,
            debug_facets: overrides.debug_facets.clone(),
            exit_on_eof: overrides.exit_on_eof,
            bus_overrides: kv
                .bus_pairs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }
}

fn required_f64(kv: &KvConfig, key: &'static str) -> Result<f64, ConfigError> {
    let value = kv.get(key).ok_or(ConfigError::Missing(key))?;
    value.parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn optional_parse<T: FromStr>(kv: &KvConfig, key: &str) -> Result<Option<T>, ConfigError> {
    kv.get(key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_pairs() -> Vec<(String, String)> {
        [
            ("privacy.filter.geofence.sw.lat", "35.90"),
            ("privacy.filter.geofence.sw.lon", "-84.10"),
            ("privacy.filter.geofence.ne.lat", "35.92"),
            ("privacy.filter.geofence.ne.lon", "-84.08"),
            ("privacy.filter.geofence.mapfile", "/tmp/fence.csv"),
            ("privacy.topic.consumer", "topic.OdeBsmJson"),
            ("privacy.topic.producer", "topic.FilteredOdeBsmJson"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_load_kv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# privacy module config").unwrap();
        writeln!(file, "metadata.broker.list = localhost:9092").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "privacy.topic.consumer=topic.OdeBsmJson").unwrap();
        writeln!(file, "  privacy.kafka.partition = 0  ").unwrap();

        let kv = KvConfig::load(file.path()).unwrap();
        assert_eq!(kv.get("metadata.broker.list"), Some("localhost:9092"));
        assert_eq!(kv.get("privacy.topic.consumer"), Some("topic.OdeBsmJson"));
        assert_eq!(kv.get("privacy.kafka.partition"), Some("0"));
    }

    #[test]
    fn test_load_rejects_bare_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "justakey").unwrap();
        assert!(matches!(
            KvConfig::load(file.path()),
            Err(ConfigError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn test_key_partition() {
        let kv = KvConfig::from_pairs(vec![
            ("metadata.broker.list".into(), "localhost:9092".into()),
            ("privacy.topic.consumer".into(), "in".into()),
        ]);
        assert_eq!(kv.bus_pairs().count(), 1);
        assert_eq!(kv.policy_pairs().count(), 1);
    }

    #[test]
    fn test_resolve_defaults() {
        let kv = KvConfig::from_pairs(base_pairs());
        let config = PolicyConfig::resolve(&kv, &Overrides::default()).unwrap();

        assert_eq!(config.brokers, DEFAULT_BROKERS);
        assert_eq!(config.consumer_timeout_ms, DEFAULT_CONSUMER_TIMEOUT_MS);
        assert_eq!(config.velocity_min, DEFAULT_VELOCITY_MIN);
        assert_eq!(config.offset, OffsetSpec::Beginning);
        assert_eq!(config.partition, None);
        assert!(!config.exit_on_eof);
        assert_eq!(config.id_redaction_value, DEFAULT_REDACTION_VALUE);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut pairs = base_pairs();
        pairs.push(("privacy.kafka.partition".into(), "2".into()));
        let kv = KvConfig::from_pairs(pairs);

        let overrides = Overrides {
            consumer_topic: Some("cli.topic".into()),
            partition: Some(7),
            brokers: Some("broker-a:9092,broker-b:9092".into()),
            offset: Some(OffsetSpec::End),
            ..Overrides::default()
        };
        let config = PolicyConfig::resolve(&kv, &overrides).unwrap();

        assert_eq!(config.consumer_topic, "cli.topic");
        assert_eq!(config.partition, Some(7));
        assert_eq!(config.brokers, "broker-a:9092,broker-b:9092");
        assert_eq!(config.offset, OffsetSpec::End);
    }

    #[test]
    fn test_missing_required_settings() {
        let mut pairs = base_pairs();
        pairs.retain(|(k, _)| k != "privacy.topic.producer");
        let kv = KvConfig::from_pairs(pairs);

        assert!(matches!(
            PolicyConfig::resolve(&kv, &Overrides::default()),
            Err(ConfigError::Missing("privacy.topic.producer"))
        ));
    }

    #[test]
    fn test_inverted_geofence_rejected() {
        let mut pairs = base_pairs();
        for (k, v) in pairs.iter_mut() {
            if k == "privacy.filter.geofence.sw.lat" {
                *v = "36.50".to_string();
            }
        }
        let kv = KvConfig::from_pairs(pairs);
        assert!(matches!(
            PolicyConfig::resolve(&kv, &Overrides::default()),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_velocity_bounds_checked() {
        let mut pairs = base_pairs();
        pairs.push(("privacy.filter.velocity.min".into(), "30.0".into()));
        pairs.push(("privacy.filter.velocity.max".into(), "5.0".into()));
        let kv = KvConfig::from_pairs(pairs);
        assert!(matches!(
            PolicyConfig::resolve(&kv, &Overrides::default()),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_offset_spec_parsing() {
        assert_eq!("beginning".parse(), Ok(OffsetSpec::Beginning));
        assert_eq!("end".parse(), Ok(OffsetSpec::End));
        assert_eq!("stored".parse(), Ok(OffsetSpec::Stored));
        assert_eq!("42".parse(), Ok(OffsetSpec::Numeric(42)));
        assert!("sideways".parse::<OffsetSpec>().is_err());
    }
}

//! Privacy Protection Module - geofence filter between two bus topics.
//!
//! Consumes vehicle Basic Safety Messages from the unfiltered topic,
//! suppresses or redacts them per the configured policy, and republishes
//! the survivors onto the filtered topic.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use tracing::info;

use ppm::logging::{self, LogSettings};
use ppm_core::{
    read_mapfile, FilterPolicy, KvConfig, OffsetSpec, Overrides, PolicyConfig, Quadtree,
};

/// Privacy Protection Module: filters a vehicle BSM stream through a
/// geofence-and-redaction policy.
#[derive(Parser, Debug)]
#[command(name = "ppm", version, about)]
struct Args {
    /// Configuration for the bus client and the privacy policy.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Check the configuration, log the effective settings, and exit.
    #[arg(short = 'C', long = "config-check")]
    config_check: bool,

    /// The unfiltered consume topic.
    #[arg(short = 'u', long = "unfiltered-topic")]
    unfiltered_topic: Option<String>,

    /// The filtered produce topic.
    #[arg(short = 'f', long = "filtered-topic")]
    filtered_topic: Option<String>,

    /// Partition to produce filtered messages to.
    #[arg(short = 'p', long = "partition")]
    partition: Option<i32>,

    /// Consumer group identifier.
    #[arg(short = 'g', long = "group")]
    group: Option<String>,

    /// List of broker addresses (host:port,...).
    #[arg(short = 'b', long = "broker")]
    broker: Option<String>,

    /// Message offset to start reading at: end, beginning, stored, or a number.
    #[arg(short = 'o', long = "offset")]
    offset: Option<String>,

    /// Exit once the last message in every partition has been received.
    #[arg(short = 'x', long = "exit")]
    exit: bool,

    /// Bus client debug facets, comma separated.
    #[arg(short = 'd', long = "debug")]
    debug: Option<String>,

    /// Map data file specifying the geofence shapes.
    #[arg(short = 'm', long = "mapfile")]
    mapfile: Option<PathBuf>,

    /// Log verbosity [trace, debug, info, warning, error, critical, off].
    #[arg(short = 'v', long = "log-level", default_value = "info")]
    log_level: String,

    /// Directory for the log files.
    #[arg(short = 'D', long = "log-dir", default_value = "logs")]
    log_dir: PathBuf,

    /// Remove pre-existing log files if they exist.
    #[arg(short = 'R', long = "log-rm")]
    log_rm: bool,

    /// Information log file name.
    #[arg(short = 'i', long = "ilog", default_value = "log.info")]
    ilog: String,

    /// Error log file name.
    #[arg(short = 'e', long = "elog", default_value = "log.error")]
    elog: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(&LogSettings {
        level: args.log_level.clone(),
        dir: args.log_dir.clone(),
        info_name: args.ilog.clone(),
        error_name: args.elog.clone(),
        remove_existing: args.log_rm,
    })?;

    let kv = KvConfig::load(&args.config)?;
    info!("using configuration file: {}", args.config.display());

    let overrides = overrides_from(&args)?;
    let config = PolicyConfig::resolve(&kv, &overrides)?;
    print_configuration(&kv, &config);

    if args.config_check {
        return Ok(());
    }

    let shapes = read_mapfile(&config.mapfile)?;
    info!(
        "ppm mapfile: {} ({} shapes)",
        config.mapfile.display(),
        shapes.len()
    );

    let fence = Quadtree::build(config.geofence, shapes)?;
    let stats = fence.stats();
    info!(
        "geofence index built: {} shapes across {} nodes, depth {}",
        stats.shapes, stats.nodes, stats.max_depth
    );

    let policy = FilterPolicy::from_config(&config, fence)?;

    run_pipeline(config, policy)
}

/// CLI options override configuration-file values.
fn overrides_from(args: &Args) -> anyhow::Result<Overrides> {
    let offset = args
        .offset
        .as_deref()
        .map(OffsetSpec::from_str)
        .transpose()
        .map_err(|e| anyhow::anyhow!("bad --offset: {e}"))?;

    Ok(Overrides {
        mapfile: args.mapfile.clone(),
        consumer_topic: args.unfiltered_topic.clone(),
        producer_topic: args.filtered_topic.clone(),
        partition: args.partition,
        offset,
        brokers: args.broker.clone(),
        group_id: args.group.clone(),
        debug_facets: args.debug.clone(),
        exit_on_eof: args.exit,
    })
}

/// Logs the effective configuration, the way the config-check mode
/// reports it.
fn print_configuration(kv: &KvConfig, config: &PolicyConfig) {
    info!("# Bus config");
    for (key, value) in kv.bus_pairs() {
        info!("{} = {}", key, value);
    }

    info!("# Privacy config");
    for (key, value) in kv.policy_pairs() {
        info!("{} = {}", key, value);
    }

    info!("consumed topic: {}", config.consumer_topic);
    info!("published topic: {}", config.producer_topic);
    match config.partition {
        Some(partition) => info!("kafka partition: {}", partition),
        None => info!("kafka partition: unassigned"),
    }
    info!("start at message offset: {}", config.offset);
    info!("brokers: {}", config.brokers);
    info!(
        "velocity filter: [{}, {}] m/s",
        config.velocity_min, config.velocity_max
    );
    info!(
        "geofence: sw={}, ne={}",
        config.geofence.sw, config.geofence.ne
    );
    if let Some(pattern) = &config.id_inclusion_pattern {
        info!(
            "id redaction: pattern {} replaced by {}",
            pattern, config.id_redaction_value
        );
    }
}

#[cfg(feature = "kafka")]
fn run_pipeline(config: PolicyConfig, policy: FilterPolicy) -> anyhow::Result<()> {
    use ppm::Engine;
    use ppm_env::{KafkaConnector, KafkaSettings, StartOffset};

    let start_offset = match config.offset {
        OffsetSpec::Beginning => StartOffset::Beginning,
        OffsetSpec::End => StartOffset::End,
        OffsetSpec::Stored => StartOffset::Stored,
        OffsetSpec::Numeric(n) => StartOffset::Numeric(n),
    };
    let connector = KafkaConnector::new(KafkaSettings {
        brokers: config.brokers.clone(),
        group_id: config.group_id.clone(),
        start_offset,
        assigned_partition: config.partition,
        debug_facets: config.debug_facets.clone(),
        overrides: config.bus_overrides.clone(),
    });

    let mut engine = Engine::new(config, policy, connector);
    register_signals(&engine)?;
    engine.run();
    Ok(())
}

#[cfg(not(feature = "kafka"))]
fn run_pipeline(_config: PolicyConfig, _policy: FilterPolicy) -> anyhow::Result<()> {
    anyhow::bail!("this build has no bus backend; rebuild with --features kafka")
}

/// Terminate-class signals flip both engine flags; SIGHUP tears the
/// stream down for a reconnect without ending the run. Nothing else
/// happens in signal context.
#[cfg(feature = "kafka")]
fn register_signals<C: ppm_env::BusConnector>(engine: &ppm::Engine<C>) -> std::io::Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use std::sync::Arc;

    let shutdown = engine.shutdown_flag();
    let stream_down = engine.stream_down_flag();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stream_down))?;
        signal_hook::flag::register(signal, Arc::clone(&shutdown))?;
    }
    signal_hook::flag::register(SIGHUP, stream_down)?;
    Ok(())
}

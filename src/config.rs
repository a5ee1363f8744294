//! Server configuration
//!
//! Values are layered with increasing priority:
//! 1. Defaults
//! 2. JSON file (first CLI argument, or `VIGIL_CONFIG`)
//! 3. Command line flags, each also readable from a `VIGIL_*` variable
//!
//! The result is validated once at startup and never changes afterwards.

use crate::cluster::ShardConfig;
use crate::store::StoreLimits;
use crate::watch::WatchConfig;
use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on automatically chosen shard counts
const MAX_AUTO_SHARDS: usize = 16;

#[derive(Debug, Parser)]
#[command(name = "vigildb", version, about = "In-memory key-value store with live watch queries")]
pub struct Args {
    /// path to a JSON configuration file
    #[arg(env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// address the RESP listener binds to
    #[arg(long, env = "VIGIL_BIND")]
    pub bind: Option<String>,

    /// number of shards, 0 = one per CPU core
    #[arg(long, env = "VIGIL_NUM_SHARDS")]
    pub num_shards: Option<usize>,

    /// per-shard key ceiling, 0 = unbounded
    #[arg(long, env = "VIGIL_MAX_KEYS_PER_SHARD")]
    pub max_keys_per_shard: Option<usize>,

    #[arg(long, env = "VIGIL_EVICTION_SAMPLE_RATIO")]
    pub eviction_sample_ratio: Option<f64>,

    #[arg(long, env = "VIGIL_EVENT_BUS_CAPACITY")]
    pub event_bus_capacity: Option<usize>,

    /// how long a shard may wait on a full event bus, in milliseconds
    #[arg(long, env = "VIGIL_EVENT_PUBLISH_TIMEOUT_MS")]
    pub event_publish_timeout_ms: Option<u64>,

    #[arg(long, env = "VIGIL_ACTIVE_EXPIRY_INTERVAL_MS")]
    pub active_expiry_interval_ms: Option<u64>,

    /// push recomputed watch results even when unchanged (true/false)
    #[arg(long, env = "VIGIL_PUSH_UNCHANGED_RESULTS")]
    pub push_unchanged_results: Option<bool>,

    /// default tracing directive, RUST_LOG takes precedence
    #[arg(long, env = "VIGIL_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the RESP listener binds to
    pub bind: String,

    /// Number of shards, 0 = one per CPU core
    pub num_shards: usize,

    /// Per-shard key ceiling, 0 = unbounded
    pub max_keys_per_shard: usize,

    /// Fraction of a shard's keys sampled per eviction
    pub eviction_sample_ratio: f64,

    /// Capacity of the mutation event bus
    pub event_bus_capacity: usize,

    /// How long a shard may wait on a full bus before dropping the event
    pub event_publish_timeout_ms: u64,

    pub active_expiry_interval_ms: u64,

    /// Push a recomputed watch result even when it equals the last one
    pub push_unchanged_results: bool,

    /// Default tracing directive, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:7379".to_string(),
            num_shards: 0,
            max_keys_per_shard: 0,
            eviction_sample_ratio: 0.1,
            event_bus_capacity: 4096,
            event_publish_timeout_ms: 5,
            active_expiry_interval_ms: 100,
            push_unchanged_results: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration for the running process
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Read the file named by `args`, then apply the flags on top
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: Args) {
        if let Some(v) = args.bind {
            self.bind = v;
        }
        if let Some(v) = args.num_shards {
            self.num_shards = v;
        }
        if let Some(v) = args.max_keys_per_shard {
            self.max_keys_per_shard = v;
        }
        if let Some(v) = args.eviction_sample_ratio {
            self.eviction_sample_ratio = v;
        }
        if let Some(v) = args.event_bus_capacity {
            self.event_bus_capacity = v;
        }
        if let Some(v) = args.event_publish_timeout_ms {
            self.event_publish_timeout_ms = v;
        }
        if let Some(v) = args.active_expiry_interval_ms {
            self.active_expiry_interval_ms = v;
        }
        if let Some(v) = args.push_unchanged_results {
            self.push_unchanged_results = v;
        }
        if let Some(v) = args.log_level {
            self.log_level = v;
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind.is_empty() {
            bail!("bind address must not be empty");
        }
        if !(self.eviction_sample_ratio > 0.0 && self.eviction_sample_ratio <= 1.0) {
            bail!(
                "eviction_sample_ratio {} must be in (0, 1]",
                self.eviction_sample_ratio
            );
        }
        if self.event_bus_capacity == 0 {
            bail!("event_bus_capacity must be > 0");
        }
        if self.active_expiry_interval_ms == 0 {
            bail!("active_expiry_interval_ms must be > 0");
        }
        Ok(())
    }

    /// Effective shard count
    pub fn shard_count(&self) -> usize {
        if self.num_shards == 0 {
            num_cpus::get().clamp(1, MAX_AUTO_SHARDS)
        } else {
            self.num_shards
        }
    }

    pub fn event_publish_timeout(&self) -> Duration {
        Duration::from_millis(self.event_publish_timeout_ms)
    }

    pub fn shard_config(&self, shard_id: usize) -> ShardConfig {
        ShardConfig {
            shard_id,
            limits: StoreLimits {
                max_keys: self.max_keys_per_shard,
                eviction_sample_ratio: self.eviction_sample_ratio,
            },
            active_expiry_interval: Duration::from_millis(self.active_expiry_interval_ms),
        }
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            push_unchanged_results: self.push_unchanged_results,
        }
    }
}

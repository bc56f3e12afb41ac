use std::time::Duration;

use tracing::warn;

use crate::error::{Result, TernError};

/// Identifier allocation strategy selected by `id.strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Snowflake-style `[41 ts][10 worker][12 seq]` ids, unique across
    /// independently-running processes.
    DistributedTimeSequence,
    /// In-memory cached counters written back to the authoritative store on
    /// commit. Unique per store.
    MemorySequence,
    /// High 64 bits of a random (v4) UUID.
    UuidRandom,
    /// Time-based (v1) UUID guarded by the durable clock synchronizer.
    UuidTime,
}

impl IdStrategy {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "distributed-time-sequence" => Ok(IdStrategy::DistributedTimeSequence),
            "memory-sequence" => Ok(IdStrategy::MemorySequence),
            "uuid-random" => Ok(IdStrategy::UuidRandom),
            "uuid-time" => Ok(IdStrategy::UuidTime),
            other => Err(TernError::Invalid(format!(
                "unsupported id.strategy {other:?}"
            ))),
        }
    }
}

/// Configuration for the identity and caching core.
#[derive(Debug, Clone)]
pub struct Config {
    pub id_strategy: IdStrategy,
    /// Explicit worker/datacenter id for the distributed strategy; 0 means
    /// derive one from a network interface or fall back to random.
    pub worker_id: u16,
    pub cache_max_entries: usize,
    pub cache_lifespan: Duration,
    pub cache_max_idle: Duration,
    /// Result-set size above which a query result is streamed through
    /// uncached.
    pub cache_max_result_size: usize,
    pub refresh_default_expiry: Duration,
    pub refresh_retry_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_strategy: IdStrategy::MemorySequence,
            worker_id: 0,
            cache_max_entries: 10_000,
            cache_lifespan: Duration::from_secs(10 * 60),
            cache_max_idle: Duration::from_secs(5 * 60),
            cache_max_result_size: 10_000,
            refresh_default_expiry: Duration::from_secs(86_400),
            refresh_retry_after: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Builds a config from dotted option pairs. Unknown keys are ignored
    /// with a warning; unparsable values and unknown strategy names are
    /// fatal.
    pub fn from_options<'a>(options: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut cfg = Config::default();
        for (key, value) in options {
            match key {
                "id.strategy" => cfg.id_strategy = IdStrategy::parse(value)?,
                "id.workerId" => cfg.worker_id = parse_num(key, value)?,
                "cache.maxEntries" => cfg.cache_max_entries = parse_num(key, value)?,
                "cache.lifespanMinutes" => {
                    cfg.cache_lifespan = Duration::from_secs(parse_num::<u64>(key, value)? * 60);
                }
                "cache.maxIdleMinutes" => {
                    cfg.cache_max_idle = Duration::from_secs(parse_num::<u64>(key, value)? * 60);
                }
                "cache.maxResultSize" => cfg.cache_max_result_size = parse_num(key, value)?,
                "refresh.defaultExpirySeconds" => {
                    cfg.refresh_default_expiry = Duration::from_secs(parse_num(key, value)?);
                }
                "refresh.retryAfterSeconds" => {
                    cfg.refresh_retry_after = Duration::from_secs(parse_num(key, value)?);
                }
                other => warn!(option = other, "config.unknown_option"),
            }
        }
        Ok(cfg)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TernError::Invalid(format!("option {key}: bad value {value:?}")))
}

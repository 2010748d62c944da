//! One gather cycle over every ZFS source.
//!
//! `ZfsCollector` merges the static kstat snapshots, the `zpool list` output
//! and the averaged `zpool iostat` window into per-pool records, and emits one
//! cycle-wide record with the global kstat counters.

use std::collections::BTreeMap;
use std::io;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::collector::iostat::{IostatParseError, NormalizedPoolStats, Supervisor};
use crate::collector::kstat::{self, KstatError};
use crate::collector::traits::{CommandRunner, FileSystem};
use crate::collector::zpool_list::{self, PoolListing, ZpoolListError};
use crate::config::ZfsConfig;
use crate::metrics::Metric;

/// Health tag used when a pool is missing from `zpool list`.
pub const UNKNOWN_HEALTH: &str = "UNKNOWN";

/// Errors that abort a gather cycle.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("zpool list: {0}")]
    ZpoolList(#[from] ZpoolListError),

    #[error("kstat: {0}")]
    Kstat(#[from] KstatError),

    #[error("zpool iostat: {0}")]
    Iostat(#[from] IostatParseError),
}

/// Time spent in each phase of the last gather.
#[derive(Debug, Clone, Default)]
pub struct GatherTiming {
    pub total: Duration,
    pub zpool_list: Duration,
    pub iostat: Duration,
    pub pools: Duration,
    pub kstats: Duration,
}

/// Everything known about one pool in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub name: String,
    pub io: BTreeMap<String, i64>,
    pub listing: Option<PoolListing>,
    pub iostat: Option<NormalizedPoolStats>,
}

impl PoolSnapshot {
    pub fn health(&self) -> &str {
        self.listing
            .as_ref()
            .map_or(UNKNOWN_HEALTH, |l| l.health.as_str())
    }

    /// Converts to a `zfs_pool` record. Later sources win on key clashes:
    /// kstat `io`, then `zpool list`, then `zpool iostat`.
    pub fn into_metric(self, timestamp: DateTime<Utc>) -> Metric {
        let mut metric = Metric::new("zfs_pool", timestamp)
            .tag("pool", self.name.clone())
            .tag("health", self.health());

        for (key, value) in self.io {
            metric = metric.field(key, value);
        }

        if let Some(listing) = self.listing {
            metric = metric.field("size", listing.size);
            if let Some(usage) = listing.usage {
                metric = metric
                    .field("allocated", usage.allocated)
                    .field("free", usage.free)
                    .field("fragmentation", usage.fragmentation)
                    .field("capacity", usage.capacity)
                    .field("dedupratio", usage.dedupratio)
                    .field("freeing", usage.freeing)
                    .field("leaked", usage.leaked);
            }
        }

        if let Some(stats) = self.iostat {
            metric = metric
                .field("iostat_alloc", stats.alloc)
                .field("iostat_free", stats.free);
            for (key, value) in stats.counters.iter() {
                metric = metric.field(key, value);
            }
        }

        metric
    }
}

/// Cycle-wide global kstat counters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KstatSummary {
    pub pools: Vec<String>,
    pub counters: BTreeMap<String, i64>,
}

impl KstatSummary {
    pub fn into_metric(self, timestamp: DateTime<Utc>) -> Metric {
        let mut metric = Metric::new("zfs", timestamp).tag("pools", self.pools.join("::"));
        for (key, value) in self.counters {
            metric = metric.field(key, value);
        }
        metric
    }
}

/// Collects ZFS metrics from kstats, `zpool list` and `zpool iostat`.
pub struct ZfsCollector<F: FileSystem, R: CommandRunner> {
    fs: F,
    runner: R,
    config: ZfsConfig,
    supervisor: Option<Supervisor>,
    last_timing: Option<GatherTiming>,
}

impl<F: FileSystem, R: CommandRunner> ZfsCollector<F, R> {
    pub fn new(fs: F, runner: R, config: ZfsConfig) -> Self {
        Self {
            fs,
            runner,
            config,
            supervisor: None,
            last_timing: None,
        }
    }

    pub fn config(&self) -> &ZfsConfig {
        &self.config
    }

    /// Starts the background `zpool iostat` stream if enabled.
    pub fn start(&mut self) -> io::Result<()> {
        if !self.config.pool_iostat_metrics {
            return Ok(());
        }
        let iostat = self.config.iostat.clone();
        self.supervisor
            .get_or_insert_with(|| Supervisor::new(iostat))
            .start()
    }

    /// Stops the background stream. The collector can be started again.
    pub fn stop(&mut self) {
        if let Some(supervisor) = self.supervisor.as_mut() {
            supervisor.stop();
        }
    }

    /// The iostat supervisor, once `start()` created it.
    pub fn supervisor(&self) -> Option<&Supervisor> {
        self.supervisor.as_ref()
    }

    pub fn last_timing(&self) -> Option<&GatherTiming> {
        self.last_timing.as_ref()
    }

    /// Runs one gather cycle and returns the records to hand to a sink.
    pub fn gather(&mut self) -> Result<Vec<Metric>, CollectError> {
        let total_start = Instant::now();
        let mut timing = GatherTiming::default();
        let timestamp = Utc::now();
        let kstat_path = self.config.kstat_path().to_string();

        let start = Instant::now();
        let mut listings = if self.config.pool_metrics {
            zpool_list::zpool_list(&self.runner)?
        } else {
            BTreeMap::new()
        };
        timing.zpool_list = start.elapsed();

        let pools = kstat::list_pools(&self.fs, &kstat_path);

        let start = Instant::now();
        let mut iostats = match &self.supervisor {
            Some(supervisor) if self.config.pool_iostat_metrics => {
                if !supervisor.is_running() {
                    warn!(state = ?supervisor.state(), "zpool iostat is not running");
                }
                supervisor
                    .feed()
                    .sample(pools.len(), &self.config.iostat.sampling)?
            }
            _ => BTreeMap::new(),
        };
        timing.iostat = start.elapsed();

        let mut metrics = Vec::with_capacity(pools.len() + 1);

        let start = Instant::now();
        if self.config.pool_metrics {
            for pool in &pools {
                let snapshot = PoolSnapshot {
                    name: pool.name.clone(),
                    io: kstat::read_pool_io(&self.fs, pool)?,
                    listing: listings.remove(&pool.name),
                    iostat: iostats.remove(&pool.name),
                };
                metrics.push(snapshot.into_metric(timestamp));
            }
        }
        timing.pools = start.elapsed();

        let start = Instant::now();
        let summary = KstatSummary {
            pools: pools.into_iter().map(|p| p.name).collect(),
            counters: kstat::collect_kstats(&self.fs, &kstat_path, &self.config.kstat_metrics()),
        };
        metrics.push(summary.into_metric(timestamp));
        timing.kstats = start.elapsed();

        timing.total = total_start.elapsed();
        debug!(
            records = metrics.len(),
            total_ms = timing.total.as_millis() as u64,
            iostat_ms = timing.iostat.as_millis() as u64,
            "gather complete"
        );
        self.last_timing = Some(timing);
        Ok(metrics)
    }
}

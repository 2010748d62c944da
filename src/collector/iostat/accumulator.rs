//! Per-pool aggregation of iostat records over one gather window.

use std::collections::{BTreeMap, HashMap};

use super::parser::{COUNTER_COUNT, IostatCounters, IostatRecord};

/// Running totals for one pool within a window.
///
/// Gauges keep the latest sample; counters are summed and divided by
/// `samples` when the window is finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAccumulator {
    pool: String,
    alloc: i64,
    free: i64,
    sums: [i64; COUNTER_COUNT],
    samples: u32,
}

impl PoolAccumulator {
    /// Starts an accumulator from the first record seen for a pool.
    pub fn new(record: IostatRecord) -> Self {
        Self {
            pool: record.pool,
            alloc: record.alloc,
            free: record.free,
            sums: record.counters.0,
            samples: 1,
        }
    }

    /// Folds a later record for the same pool into the totals.
    pub fn merge(&mut self, record: &IostatRecord) {
        debug_assert_eq!(self.pool, record.pool);
        self.alloc = record.alloc;
        self.free = record.free;
        for (sum, value) in self.sums.iter_mut().zip(record.counters.0) {
            *sum = sum.saturating_add(value);
        }
        self.samples += 1;
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Summed value of a counter, before normalization.
    pub fn sum(&self, idx: usize) -> i64 {
        self.sums[idx]
    }

    /// Averages the counters over the sample count.
    ///
    /// Returns `None` for an accumulator without samples.
    pub fn normalize(&self) -> Option<NormalizedPoolStats> {
        if self.samples == 0 {
            return None;
        }
        let samples = f64::from(self.samples);
        let mut counters = IostatCounters::default();
        for (avg, sum) in counters.0.iter_mut().zip(self.sums) {
            *avg = (sum as f64 / samples).round() as i64;
        }
        Some(NormalizedPoolStats {
            pool: self.pool.clone(),
            alloc: self.alloc,
            free: self.free,
            counters,
            samples: self.samples,
        })
    }
}

/// Final per-pool result of a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPoolStats {
    pub pool: String,
    pub alloc: i64,
    pub free: i64,
    /// Per-sample averages, rounded to the nearest integer.
    pub counters: IostatCounters,
    /// Number of records folded into this result.
    pub samples: u32,
}

/// Accumulators for every pool seen in the current window.
#[derive(Debug, Default)]
pub struct IostatWindow {
    pools: HashMap<String, PoolAccumulator>,
    records: usize,
}

impl IostatWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record, creating the pool's accumulator on first sight.
    pub fn fold(&mut self, record: IostatRecord) {
        self.records += 1;
        match self.pools.get_mut(&record.pool) {
            Some(acc) => acc.merge(&record),
            None => {
                self.pools
                    .insert(record.pool.clone(), PoolAccumulator::new(record));
            }
        }
    }

    /// Total records folded so far, across all pools.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn get(&self, pool: &str) -> Option<&PoolAccumulator> {
        self.pools.get(pool)
    }

    /// Normalizes every pool and ends the window.
    pub fn finish(self) -> BTreeMap<String, NormalizedPoolStats> {
        self.pools
            .into_values()
            .filter_map(|acc| acc.normalize())
            .map(|stats| (stats.pool.clone(), stats))
            .collect()
    }
}

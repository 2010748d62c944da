//! Collector configuration.
//!
//! Defaults mirror a stock OpenZFS-on-Linux host: kstats under
//! `/proc/spl/kstat/zfs`, `zpool` on `PATH`, and pool-level collection off
//! until explicitly enabled.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kstat files read when no explicit list is configured.
///
/// `vdev_cache_stats` is deprecated, and `xuio_stats` has no consumers on Linux.
pub const DEFAULT_KSTAT_METRICS: [&str; 9] = [
    "abdstats",
    "arcstats",
    "dnodestats",
    "dbufcachestats",
    "dmu_tx",
    "fm",
    "vdev_mirror_stats",
    "zfetchstats",
    "zil",
];

pub const DEFAULT_KSTAT_PATH: &str = "/proc/spl/kstat/zfs";

/// Enough room for one line per pool per second over a 10 second interval
/// on hosts with up to 100 pools.
pub const DEFAULT_IOSTAT_BUFFER: usize = 1000;

/// Top-level collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZfsConfig {
    /// Directory holding the ZFS kstat files.
    pub kstat_path: String,
    /// Kstat files to read; empty means [`DEFAULT_KSTAT_METRICS`].
    pub kstat_metrics: Vec<String>,
    /// Emit one `zfs_pool` record per pool (requires `zpool` on `PATH`).
    pub pool_metrics: bool,
    /// Stream `zpool iostat` in the background and average it per gather.
    pub pool_iostat_metrics: bool,
    pub iostat: IostatConfig,
}

impl Default for ZfsConfig {
    fn default() -> Self {
        Self {
            kstat_path: DEFAULT_KSTAT_PATH.to_string(),
            kstat_metrics: Vec::new(),
            pool_metrics: false,
            pool_iostat_metrics: false,
            iostat: IostatConfig::default(),
        }
    }
}

impl ZfsConfig {
    /// Kstat metric files to read, falling back to the defaults.
    pub fn kstat_metrics(&self) -> Vec<String> {
        if self.kstat_metrics.is_empty() {
            DEFAULT_KSTAT_METRICS.iter().map(|s| s.to_string()).collect()
        } else {
            self.kstat_metrics.clone()
        }
    }

    /// Kstat directory, falling back to the default when blank.
    pub fn kstat_path(&self) -> &str {
        if self.kstat_path.is_empty() {
            DEFAULT_KSTAT_PATH
        } else {
            &self.kstat_path
        }
    }
}

/// Settings for the background `zpool iostat` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IostatConfig {
    /// Program and arguments of the long-running command.
    pub command: Vec<String>,
    /// Queue capacity in lines.
    pub buffer_size: usize,
    pub sampling: SufficiencyPolicy,
    pub restart: RestartPolicy,
}

impl Default for IostatConfig {
    fn default() -> Self {
        Self {
            command: ["zpool", "iostat", "-Hp", "-l", "-q", "-y", "1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            buffer_size: DEFAULT_IOSTAT_BUFFER,
            sampling: SufficiencyPolicy::default(),
            restart: RestartPolicy::default(),
        }
    }
}

/// When a sampling window has seen enough lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SufficiencyPolicy {
    /// How long to wait for a line before counting an empty poll.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Empty polls tolerated before the window closes short.
    pub max_empty_polls: u32,
}

impl Default for SufficiencyPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_empty_polls: 50,
        }
    }
}

/// Restart behaviour of the iostat supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Give up after this many consecutive restarts; `None` retries forever.
    pub max_restarts: Option<u32>,
    /// A producer that ran this long resets the backoff.
    #[serde(with = "millis")]
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_restarts: None,
            stable_after: Duration::from_secs(60),
        }
    }
}

/// Serializes durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ZfsConfig::default();
        assert_eq!(config.kstat_path(), "/proc/spl/kstat/zfs");
        assert_eq!(config.kstat_metrics().len(), 9);
        assert!(!config.pool_metrics);
        assert!(!config.pool_iostat_metrics);
        assert_eq!(config.iostat.buffer_size, 1000);
        assert_eq!(
            config.iostat.command.join(" "),
            "zpool iostat -Hp -l -q -y 1"
        );
    }

    #[test]
    fn test_explicit_metrics_override_defaults() {
        let config = ZfsConfig {
            kstat_metrics: vec!["arcstats".to_string()],
            kstat_path: String::new(),
            ..ZfsConfig::default()
        };
        assert_eq!(config.kstat_metrics(), vec!["arcstats"]);
        assert_eq!(config.kstat_path(), DEFAULT_KSTAT_PATH);
    }

    #[test]
    fn test_json_round_trip_with_partial_input() {
        let config: ZfsConfig = serde_json::from_str(
            r#"{"pool_metrics": true, "iostat": {"sampling": {"poll_interval": 250}}}"#,
        )
        .unwrap();
        assert!(config.pool_metrics);
        assert_eq!(
            config.iostat.sampling.poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.iostat.sampling.max_empty_polls, 50);
        assert_eq!(config.iostat.restart, RestartPolicy::default());

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"poll_interval\":250"));
    }
}

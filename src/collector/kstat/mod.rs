//! Static kstat snapshots under `/proc/spl/kstat/zfs`.
//!
//! Pools are discovered from the directory layout: every child directory that
//! holds an `io` file is an imported pool. Global counters come from the named
//! kstat files next to them (`arcstats`, `zil`, ...).

mod parser;

pub use parser::{KstatParseError, parse_named_kstat, parse_pool_io};

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::collector::traits::FileSystem;

/// Errors from reading kstat files.
#[derive(Debug, Error)]
pub enum KstatError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: KstatParseError,
    },
}

/// A pool found in the kstat directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub name: String,
    pub io_path: PathBuf,
}

/// Lists pools under `kstat_path`, sorted by name.
///
/// A missing or unreadable directory means no pools are imported.
pub fn list_pools<F: FileSystem>(fs: &F, kstat_path: &str) -> Vec<PoolInfo> {
    let entries = match fs.read_dir(Path::new(kstat_path)) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = kstat_path, error = %e, "kstat directory not readable");
            return Vec::new();
        }
    };

    let mut pools: Vec<PoolInfo> = entries
        .into_iter()
        .filter_map(|dir| {
            let io_path = dir.join("io");
            if !fs.exists(&io_path) {
                return None;
            }
            let name = dir.file_name()?.to_str()?.to_string();
            Some(PoolInfo { name, io_path })
        })
        .collect();
    pools.sort_by(|a, b| a.name.cmp(&b.name));
    pools
}

/// Reads and parses the `io` snapshot of one pool.
pub fn read_pool_io<F: FileSystem>(
    fs: &F,
    pool: &PoolInfo,
) -> Result<BTreeMap<String, i64>, KstatError> {
    let content = fs
        .read_to_string(&pool.io_path)
        .map_err(|source| KstatError::Io {
            path: pool.io_path.clone(),
            source,
        })?;
    parse_pool_io(&content).map_err(|source| KstatError::Parse {
        path: pool.io_path.clone(),
        source,
    })
}

/// Reads the named kstat files listed in `metrics` and merges their counters.
///
/// Files that cannot be read are skipped; not every module exposes every
/// kstat on every ZFS release.
pub fn collect_kstats<F: FileSystem>(
    fs: &F,
    kstat_path: &str,
    metrics: &[String],
) -> BTreeMap<String, i64> {
    let mut counters = BTreeMap::new();
    for metric in metrics {
        let path = Path::new(kstat_path).join(metric);
        match fs.read_to_string(&path) {
            Ok(content) => {
                let parsed = parse_named_kstat(metric, &content);
                trace!(metric = %metric, counters = parsed.len(), "read kstat");
                counters.extend(parsed);
            }
            Err(e) => debug!(metric = %metric, error = %e, "skipping kstat"),
        }
    }
    counters
}

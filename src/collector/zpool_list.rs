//! Pool capacity and health from `zpool list`.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::collector::traits::{CommandError, CommandRunner};

/// Columns requested from `zpool list`, in output order.
pub const ZPOOL_LIST_COLUMNS: &str =
    "name,health,size,alloc,free,fragmentation,capacity,dedupratio,freeing,leaked";

const COLUMN_COUNT: usize = 10;

/// Health reported for pools whose devices cannot be opened.
pub const HEALTH_UNAVAIL: &str = "UNAVAIL";

#[derive(Debug, Error)]
pub enum ZpoolListError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("error parsing {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Space accounting of an available pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolUsage {
    pub allocated: i64,
    pub free: i64,
    /// Percent; 0 when the pool does not report it (read-only devices).
    pub fragmentation: i64,
    pub capacity: i64,
    pub dedupratio: f64,
    pub freeing: i64,
    pub leaked: i64,
}

/// One row of `zpool list`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolListing {
    pub name: String,
    pub health: String,
    pub size: i64,
    /// `None` for `UNAVAIL` pools.
    pub usage: Option<PoolUsage>,
}

fn int_field(field: &'static str, value: &str) -> Result<i64, ZpoolListError> {
    value.parse().map_err(|_| ZpoolListError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn parse_row(cols: &[&str]) -> Result<PoolListing, ZpoolListError> {
    let name = cols[0].to_string();
    let health = cols[1].to_string();

    if health == HEALTH_UNAVAIL {
        return Ok(PoolListing {
            name,
            health,
            size: 0,
            usage: None,
        });
    }

    let size = int_field("size", cols[2])?;
    let usage = PoolUsage {
        allocated: int_field("allocation", cols[3])?,
        free: int_field("free", cols[4])?,
        fragmentation: cols[5].trim_end_matches('%').parse().unwrap_or(0),
        capacity: int_field("capacity", cols[6])?,
        dedupratio: cols[7].trim_end_matches('x').parse().map_err(|_| {
            ZpoolListError::InvalidField {
                field: "dedupratio",
                value: cols[7].to_string(),
            }
        })?,
        freeing: int_field("freeing", cols[8])?,
        leaked: int_field("leaked", cols[9])?,
    };

    Ok(PoolListing {
        name,
        health,
        size,
        usage: Some(usage),
    })
}

/// Parses `zpool list -Hp` output into listings keyed by pool name.
///
/// Lines without exactly ten tab-separated columns are ignored.
pub fn parse_zpool_list<S: AsRef<str>>(
    lines: &[S],
) -> Result<BTreeMap<String, PoolListing>, ZpoolListError> {
    let mut pools = BTreeMap::new();
    for line in lines {
        let cols: Vec<&str> = line.as_ref().split('\t').collect();
        if cols.len() != COLUMN_COUNT {
            continue;
        }
        let listing = parse_row(&cols)?;
        pools.insert(listing.name.clone(), listing);
    }
    Ok(pools)
}

/// Runs `zpool list` through `runner` and parses the result.
pub fn zpool_list<R: CommandRunner + ?Sized>(
    runner: &R,
) -> Result<BTreeMap<String, PoolListing>, ZpoolListError> {
    let lines = runner.run("zpool", &["list", "-Hp", "-o", ZPOOL_LIST_COLUMNS])?;
    parse_zpool_list(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockRunner;

    #[test]
    fn test_parse_online_pool() {
        let pools = parse_zpool_list(&[
            "rpool\tONLINE\t532575944704\t152567005184\t380008939520\t17\t28\t1.00\t0\t0",
        ])
        .unwrap();
        let rpool = &pools["rpool"];
        assert_eq!(rpool.health, "ONLINE");
        assert_eq!(rpool.size, 532575944704);
        let usage = rpool.usage.as_ref().unwrap();
        assert_eq!(usage.allocated, 152567005184);
        assert_eq!(usage.fragmentation, 17);
        assert_eq!(usage.capacity, 28);
        assert_eq!(usage.dedupratio, 1.0);
    }

    #[test]
    fn test_parse_suffixes_and_read_only_fragmentation() {
        let pools = parse_zpool_list(&[
            "tank\tONLINE\t100\t50\t50\t-\t50\t1.50x\t0\t0",
            "ro\tONLINE\t1\t1\t0\t3%\t99\t1.00x\t0\t0",
        ])
        .unwrap();
        let tank = pools["tank"].usage.as_ref().unwrap();
        assert_eq!(tank.fragmentation, 0);
        assert_eq!(tank.dedupratio, 1.5);
        assert_eq!(pools["ro"].usage.as_ref().unwrap().fragmentation, 3);
    }

    #[test]
    fn test_parse_unavail_pool() {
        let pools = parse_zpool_list(&["gone\tUNAVAIL\t-\t-\t-\t-\t-\t-\t-\t-"]).unwrap();
        assert_eq!(pools["gone"].size, 0);
        assert!(pools["gone"].usage.is_none());
    }

    #[test]
    fn test_parse_skips_short_lines() {
        let pools = parse_zpool_list(&["", "no pools available", "a\tb\tc"]).unwrap();
        assert!(pools.is_empty());
    }

    #[test]
    fn test_parse_invalid_field() {
        let err =
            parse_zpool_list(&["tank\tONLINE\tbig\t50\t50\t1\t50\t1.00\t0\t0"]).unwrap_err();
        match err {
            ZpoolListError::InvalidField { field, value } => {
                assert_eq!(field, "size");
                assert_eq!(value, "big");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zpool_list_via_runner() {
        let runner = MockRunner::two_pool_system();
        let pools = zpool_list(&runner).unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools["tank"].health, "DEGRADED");
        assert_eq!(pools["tank"].usage.as_ref().unwrap().freeing, 4096);
        assert_eq!(
            runner.calls(),
            vec![format!("zpool list -Hp -o {ZPOOL_LIST_COLUMNS}")]
        );
    }

    #[test]
    fn test_zpool_list_missing_binary() {
        let runner = MockRunner::new().with_missing("zpool");
        let err = zpool_list(&runner).unwrap_err();
        assert!(matches!(
            err,
            ZpoolListError::Command(CommandError::NotFound { .. })
        ));
    }
}

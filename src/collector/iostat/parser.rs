//! Parser for `zpool iostat -Hp -l -q` output lines.
//!
//! Each line is tab-separated: the pool name followed by 25 integer columns.
//! The first two columns (`alloc`, `free`) are point-in-time gauges; the
//! remaining 23 are per-interval counters that get averaged over a window.

use std::fmt;
use std::num::ParseIntError;

use thiserror::Error;

/// Number of gauge columns at the start of the schema.
pub const GAUGE_COUNT: usize = 2;

/// Number of cumulative counter columns following the gauges.
pub const COUNTER_COUNT: usize = 23;

/// Total columns in a data line: pool name plus every metric.
pub const IOSTAT_COLUMNS: usize = 1 + GAUGE_COUNT + COUNTER_COUNT;

/// Field names of the gauge columns, in column order.
pub const GAUGE_KEYS: [&str; GAUGE_COUNT] = ["iostat_alloc", "iostat_free"];

/// Field names of the counter columns, in column order.
pub const COUNTER_KEYS: [&str; COUNTER_COUNT] = [
    "operations_read",
    "operations_write",
    "bandwidth_read",
    "bandwidth_write",
    "total_wait_read",
    "total_wait_write",
    "disk_wait_read",
    "disk_wait_write",
    "syncq_wait_read",
    "syncq_wait_write",
    "asyncq_wait_read",
    "asyncq_wait_write",
    "scrub_wait",
    "syncq_read_operations_pend",
    "syncq_read_operations_activ",
    "syncq_write_operations_pend",
    "syncq_write_operations_activ",
    "asyncq_read_operations_pend",
    "asyncq_read_operations_activ",
    "asyncq_write_operations_pend",
    "asyncq_write_operations_activ",
    "scrubq_read_pend",
    "scrubq_read_activ",
];

/// Placeholder `zpool iostat` prints for values that do not apply.
const NOT_APPLICABLE: &str = "-";

/// Values of the 23 counter columns, indexed like [`COUNTER_KEYS`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IostatCounters(pub [i64; COUNTER_COUNT]);

impl IostatCounters {
    /// Looks up a counter by its field name.
    pub fn get(&self, key: &str) -> Option<i64> {
        COUNTER_KEYS
            .iter()
            .position(|k| *k == key)
            .map(|idx| self.0[idx])
    }

    /// Iterates `(field name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, i64)> + '_ {
        COUNTER_KEYS.iter().copied().zip(self.0.iter().copied())
    }
}

/// One parsed data line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IostatRecord {
    pub pool: String,
    /// Allocated bytes (gauge).
    pub alloc: i64,
    /// Free bytes (gauge).
    pub free: i64,
    pub counters: IostatCounters,
}

/// Result of parsing a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IostatLine {
    /// Blank or separator line with no tab; carries no data.
    Skip,
    Record(IostatRecord),
}

/// Errors from [`parse_iostat_line`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IostatParseError {
    /// The line is neither a separator nor a full data line.
    #[error("expected {expected} columns in zpool iostat line, got {found}: {line:?}")]
    ColumnCount {
        expected: usize,
        found: usize,
        line: String,
    },
    /// The pool name column is empty.
    #[error("missing pool name in zpool iostat line: {line:?}")]
    MissingPool { line: String },
    /// A metric column is not a base-10 i64.
    #[error("error parsing {key}: {value:?} can not be parsed into int: {source}")]
    InvalidValue {
        key: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
        /// Columns parsed before the failure; later ones are left at zero.
        partial: Box<IostatRecord>,
    },
}

impl IostatParseError {
    /// The record built up to the failing column, if parsing got that far.
    pub fn partial(&self) -> Option<&IostatRecord> {
        match self {
            IostatParseError::InvalidValue { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Parses one line of `zpool iostat -Hp -l -q` output.
///
/// A line without any tab is a separator and yields [`IostatLine::Skip`].
/// A `-` in any column is read as `0`.
pub fn parse_iostat_line(line: &str) -> Result<IostatLine, IostatParseError> {
    let columns: Vec<&str> = line.split('\t').collect();
    if columns.len() == 1 {
        return Ok(IostatLine::Skip);
    }

    if columns.len() != IOSTAT_COLUMNS {
        return Err(IostatParseError::ColumnCount {
            expected: IOSTAT_COLUMNS,
            found: columns.len(),
            line: line.to_string(),
        });
    }

    let pool = columns[0];
    if pool.is_empty() || pool == NOT_APPLICABLE {
        return Err(IostatParseError::MissingPool {
            line: line.to_string(),
        });
    }

    let mut record = IostatRecord {
        pool: pool.to_string(),
        ..IostatRecord::default()
    };

    let keys = GAUGE_KEYS.iter().chain(COUNTER_KEYS.iter()).copied();
    for (idx, (key, raw)) in keys.zip(&columns[1..]).enumerate() {
        let value = match parse_value(raw) {
            Ok(v) => v,
            Err(source) => {
                return Err(IostatParseError::InvalidValue {
                    key,
                    value: raw.to_string(),
                    source,
                    partial: Box::new(record),
                });
            }
        };
        match idx {
            0 => record.alloc = value,
            1 => record.free = value,
            n => record.counters.0[n - GAUGE_COUNT] = value,
        }
    }

    Ok(IostatLine::Record(record))
}

fn parse_value(raw: &str) -> Result<i64, ParseIntError> {
    if raw == NOT_APPLICABLE {
        return Ok(0);
    }
    raw.parse()
}

impl fmt::Display for IostatRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.pool, self.alloc, self.free)?;
        for value in self.counters.0 {
            write!(f, "\t{value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a data line from a pool name and 25 values.
    fn line(pool: &str, values: &[&str]) -> String {
        assert_eq!(values.len(), GAUGE_COUNT + COUNTER_COUNT);
        let mut cols = vec![pool];
        cols.extend_from_slice(values);
        cols.join("\t")
    }

    fn numbered(start: i64) -> Vec<String> {
        (0..(GAUGE_COUNT + COUNTER_COUNT) as i64)
            .map(|i| (start + i).to_string())
            .collect()
    }

    fn unwrap_record(parsed: IostatLine) -> IostatRecord {
        match parsed {
            IostatLine::Record(r) => r,
            IostatLine::Skip => panic!("expected record, got skip"),
        }
    }

    #[test]
    fn test_parse_full_line() {
        let values = numbered(1);
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let record = unwrap_record(parse_iostat_line(&line("rpool", &refs)).unwrap());

        assert_eq!(record.pool, "rpool");
        assert_eq!(record.alloc, 1);
        assert_eq!(record.free, 2);
        assert_eq!(record.counters.get("operations_read"), Some(3));
        assert_eq!(record.counters.get("scrub_wait"), Some(15));
        assert_eq!(record.counters.get("scrubq_read_activ"), Some(25));
    }

    #[test]
    fn test_parse_is_lossless_for_extreme_values() {
        let mut values = numbered(0);
        values[0] = i64::MAX.to_string();
        values[1] = i64::MIN.to_string();
        values[24] = "-42".to_string();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let record = unwrap_record(parse_iostat_line(&line("tank", &refs)).unwrap());

        assert_eq!(record.alloc, i64::MAX);
        assert_eq!(record.free, i64::MIN);
        assert_eq!(record.counters.0[COUNTER_COUNT - 1], -42);
        for (i, (_, v)) in record.counters.iter().enumerate().take(COUNTER_COUNT - 1) {
            assert_eq!(v, (i + GAUGE_COUNT) as i64);
        }
    }

    #[test]
    fn test_dash_is_zero() {
        let mut values = numbered(10);
        values[0] = "-".to_string();
        values[14] = "-".to_string();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let record = unwrap_record(parse_iostat_line(&line("tank", &refs)).unwrap());

        assert_eq!(record.alloc, 0);
        assert_eq!(record.counters.get("scrub_wait"), Some(0));
        assert_eq!(record.free, 11);
    }

    #[test]
    fn test_line_without_tab_is_skipped() {
        assert_eq!(parse_iostat_line("").unwrap(), IostatLine::Skip);
        assert_eq!(parse_iostat_line("----------").unwrap(), IostatLine::Skip);
        assert_eq!(parse_iostat_line("rpool 1 2 3").unwrap(), IostatLine::Skip);
    }

    #[test]
    fn test_wrong_column_count() {
        let err = parse_iostat_line("rpool\t1\t2").unwrap_err();
        match &err {
            IostatParseError::ColumnCount {
                expected,
                found,
                line,
            } => {
                assert_eq!(*expected, 26);
                assert_eq!(*found, 3);
                assert_eq!(line, "rpool\t1\t2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.partial().is_none());
    }

    #[test]
    fn test_invalid_value_keeps_partial_record() {
        let mut values = numbered(1);
        values[4] = "12K".to_string();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let err = parse_iostat_line(&line("tank", &refs)).unwrap_err();

        match &err {
            IostatParseError::InvalidValue { key, value, .. } => {
                assert_eq!(*key, "bandwidth_read");
                assert_eq!(value, "12K");
            }
            other => panic!("unexpected error: {other}"),
        }
        let partial = err.partial().unwrap();
        assert_eq!(partial.pool, "tank");
        assert_eq!(partial.alloc, 1);
        assert_eq!(partial.counters.get("operations_write"), Some(4));
        assert_eq!(partial.counters.get("bandwidth_read"), Some(0));
        assert!(err.to_string().contains("bandwidth_read"));
    }

    #[test]
    fn test_empty_pool_name_is_error() {
        let values = numbered(1);
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let err = parse_iostat_line(&line("", &refs)).unwrap_err();
        assert!(matches!(err, IostatParseError::MissingPool { .. }));
    }

    #[test]
    fn test_display_matches_input() {
        let values = numbered(100);
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let raw = line("tank", &refs);
        let record = unwrap_record(parse_iostat_line(&raw).unwrap());
        assert_eq!(record.to_string(), raw);
    }
}

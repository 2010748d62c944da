//! Parsers for SPL kstat files.
//!
//! Every kstat file starts with two lines of metadata (the kstat header and
//! the column header for named kstats). Per-pool `io` files are the exception
//! in layout: a header, a line of keys, and a line of values.

use std::collections::BTreeMap;
use std::num::ParseIntError;

use thiserror::Error;

/// Errors from parsing a per-pool `io` kstat.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KstatParseError {
    #[error("key and value count don't match: {keys} keys, {values} values")]
    KeyValueMismatch { keys: usize, values: usize },

    #[error("invalid value {value:?} for {key}: {source}")]
    InvalidValue {
        key: String,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Parses the contents of `<kstat>/<pool>/io`.
///
/// A file that does not have exactly three lines yields an empty map; pools
/// that are being imported or exported briefly expose a truncated file.
pub fn parse_pool_io(content: &str) -> Result<BTreeMap<String, i64>, KstatParseError> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() != 3 {
        return Ok(BTreeMap::new());
    }

    let keys: Vec<&str> = lines[1].split_whitespace().collect();
    let values: Vec<&str> = lines[2].split_whitespace().collect();
    if keys.len() != values.len() {
        return Err(KstatParseError::KeyValueMismatch {
            keys: keys.len(),
            values: values.len(),
        });
    }

    let mut fields = BTreeMap::new();
    for (key, value) in keys.into_iter().zip(values) {
        let parsed = value
            .parse::<i64>()
            .map_err(|source| KstatParseError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                source,
            })?;
        fields.insert(key.to_string(), parsed);
    }
    Ok(fields)
}

/// Whether counters of `metric` are reported under their bare name.
fn uses_bare_names(metric: &str) -> bool {
    matches!(metric, "zil" | "dmu_tx" | "dnodestats")
}

/// Parses a named kstat file such as `arcstats`.
///
/// Rows look like `hits    4    123456`: the first space-separated token is
/// the name, the last one the value. Unparseable values become 0.
pub fn parse_named_kstat(metric: &str, content: &str) -> Vec<(String, i64)> {
    content
        .lines()
        .skip(2)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut tokens = line.split(' ');
            let name = tokens.next().unwrap_or_default();
            let raw = tokens.next_back().unwrap_or(name);
            let key = if uses_bare_names(metric) {
                name.to_string()
            } else {
                format!("{metric}_{name}")
            };
            (key, raw.parse::<i64>().unwrap_or(0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL_IO: &str = "\
22 3 0x00 1 80 1240128730 116386405683906
nread    nwritten reads    writes   wtime    wlentime wupdate  rtime    rlentime rupdate  wcnt     rcnt
1884160  6450688  22       978      272187126 2850519036 2263669418655 424226814 2850519036 2263669871823 0        0
";

    #[test]
    fn test_parse_pool_io() {
        let fields = parse_pool_io(POOL_IO).unwrap();
        assert_eq!(fields.len(), 12);
        assert_eq!(fields["nread"], 1884160);
        assert_eq!(fields["writes"], 978);
        assert_eq!(fields["rcnt"], 0);
    }

    #[test]
    fn test_parse_pool_io_wrong_line_count_is_empty() {
        assert!(parse_pool_io("").unwrap().is_empty());
        assert!(parse_pool_io("header\nnread\n").unwrap().is_empty());
        assert!(
            parse_pool_io("header\nnread\n1\nextra\n")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_parse_pool_io_mismatch() {
        let err = parse_pool_io("header\nnread nwritten\n1\n").unwrap_err();
        assert_eq!(err, KstatParseError::KeyValueMismatch { keys: 2, values: 1 });
    }

    #[test]
    fn test_parse_pool_io_invalid_value() {
        let err = parse_pool_io("header\nnread nwritten\n1 lots\n").unwrap_err();
        match err {
            KstatParseError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "nwritten");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_named_kstat_prefixes_metric() {
        let content = "\
13 1 0x01 86 4128 1239857461 1166458166236
name                            type data
hits                            4    5968846374
misses                          4    1659178751

c_max                           4    33554432000
";
        let fields = parse_named_kstat("arcstats", content);
        assert_eq!(
            fields,
            vec![
                ("arcstats_hits".to_string(), 5968846374),
                ("arcstats_misses".to_string(), 1659178751),
                ("arcstats_c_max".to_string(), 33554432000),
            ]
        );
    }

    #[test]
    fn test_parse_named_kstat_bare_names() {
        let content = "\
7 1 0x01 13 624 1239857461 1166458166236
name                            type data
zil_commit_count                4    77
zil_itx_count                   4    n/a
";
        let fields = parse_named_kstat("zil", content);
        assert_eq!(
            fields,
            vec![
                ("zil_commit_count".to_string(), 77),
                ("zil_itx_count".to_string(), 0),
            ]
        );
        assert_eq!(parse_named_kstat("dmu_tx", content)[0].0, "zil_commit_count");
    }

    #[test]
    fn test_parse_named_kstat_header_only() {
        assert!(parse_named_kstat("fm", "1 2 3\nname type data\n").is_empty());
    }
}

//! Pre-built mock kstat trees for testing.

use super::filesystem::MockFs;
use super::runner::MockRunner;

/// Key line of a per-pool `io` kstat.
const POOL_IO_KEYS: &str =
    "nread    nwritten reads    writes   wtime    wlentime wupdate  rtime    rlentime rupdate  wcnt     rcnt";

#[allow(dead_code)]
impl MockFs {
    /// A host with two imported pools, `rpool` and `tank`, and the usual
    /// global kstat files.
    pub fn two_pool_system() -> Self {
        let mut fs = Self::new();
        let kstat = "/proc/spl/kstat/zfs";

        fs.add_pool(
            kstat,
            "rpool",
            POOL_IO_KEYS,
            "1884160  6450688  22       978      272187126 2850519036 2263669418655 424226814 2850519036 2263669871823 0        0",
        );
        fs.add_pool(
            kstat,
            "tank",
            POOL_IO_KEYS,
            "409600   1048576  11       70       1000      2000       3000          4000      5000       6000          0        0",
        );

        fs.add_file(
            format!("{kstat}/arcstats"),
            "\
13 1 0x01 86 4128 1239857461 1166458166236
name                            type data
hits                            4    5968846374
misses                          4    1659178751
size                            4    16834215936
c_max                           4    33554432000
",
        );
        fs.add_file(
            format!("{kstat}/zil"),
            "\
7 1 0x01 13 624 1239857461 1166458166236
name                            type data
zil_commit_count                4    77
zil_commit_writer_count         4    76
",
        );
        fs.add_file(
            format!("{kstat}/dmu_tx"),
            "\
5 1 0x01 12 576 1239857461 1166458166236
name                            type data
dmu_tx_assigned                 4    2441
dmu_tx_delay                    4    0
",
        );
        fs.add_file(
            format!("{kstat}/zfetchstats"),
            "\
9 1 0x01 3 144 1239857461 1166458166236
name                            type data
hits                            4    1234
misses                          4    99
",
        );

        fs
    }

    /// A host with the ZFS module loaded but no pools imported.
    pub fn no_pools() -> Self {
        let mut fs = Self::new();
        fs.add_file(
            "/proc/spl/kstat/zfs/arcstats",
            "\
13 1 0x01 86 4128 1239857461 1166458166236
name                            type data
hits                            4    0
",
        );
        fs
    }
}

#[allow(dead_code)]
impl MockRunner {
    /// `zpool list` output matching [`MockFs::two_pool_system`].
    pub fn two_pool_system() -> Self {
        Self::new().with_output(
            "zpool",
            "rpool\tONLINE\t532575944704\t152567005184\t380008939520\t17\t28\t1.00\t0\t0\n\
             tank\tDEGRADED\t1992864825344\t1016318312448\t976546512896\t-\t50\t1.25\t4096\t0\n",
        )
    }
}

//! Column family definitions for RocksDB.
//!
//! - branches: branch records keyed by branch id
//! - branch_ident: (name, number) -> branch id lookup
//! - records: inventory records keyed by record id (compressed)
//! - records_by_branch: branch id + record id -> updated_at
//! - records_by_time: updated_at + record id, for incremental scans
//! - tasks: ingestion task status
//! - jobs: durable ingestion queue ordered by ready time
//! - outbox: change events for the index dispatcher (FIFO compaction)
//! - checkpoints: dispatcher progress

use rocksdb::{ColumnFamilyDescriptor, Options};

pub const CF_BRANCHES: &str = "branches";

pub const CF_BRANCH_IDENT: &str = "branch_ident";

pub const CF_RECORDS: &str = "records";

pub const CF_RECORDS_BY_BRANCH: &str = "records_by_branch";

pub const CF_RECORDS_BY_TIME: &str = "records_by_time";

pub const CF_TASKS: &str = "tasks";

pub const CF_JOBS: &str = "jobs";

/// Column family name for the change outbox
pub const CF_OUTBOX: &str = "outbox";

/// Column family name for background job checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_BRANCHES,
    CF_BRANCH_IDENT,
    CF_RECORDS,
    CF_RECORDS_BY_BRANCH,
    CF_RECORDS_BY_TIME,
    CF_TASKS,
    CF_JOBS,
    CF_OUTBOX,
    CF_CHECKPOINTS,
];

/// Inventory records are rewritten wholesale per upload; compress them.
fn records_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

fn outbox_options() -> Options {
    let mut opts = Options::default();
    opts.set_compaction_style(rocksdb::DBCompactionStyle::Fifo);
    // Required for FIFO
    opts.set_fifo_compaction_options(&rocksdb::FifoCompactOptions::default());
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_BRANCHES, Options::default()),
        ColumnFamilyDescriptor::new(CF_BRANCH_IDENT, Options::default()),
        ColumnFamilyDescriptor::new(CF_RECORDS, records_options()),
        ColumnFamilyDescriptor::new(CF_RECORDS_BY_BRANCH, Options::default()),
        ColumnFamilyDescriptor::new(CF_RECORDS_BY_TIME, Options::default()),
        ColumnFamilyDescriptor::new(CF_TASKS, Options::default()),
        ColumnFamilyDescriptor::new(CF_JOBS, Options::default()),
        ColumnFamilyDescriptor::new(CF_OUTBOX, outbox_options()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
    ]
}

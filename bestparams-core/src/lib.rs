//! bestparams core: trial record model and result store adapters.
//!
//! This crate contains:
//! - Domain types (trial records, metrics, opaque parameter sets, group keys,
//!   per-group winners)
//! - The [`store::TrialStore`] trait with the JSON trial log and SQLite table
//!   adapters
//! - The store error taxonomy (`StoreUnavailable`, `RecordCorrupt`)

pub mod domain;
pub mod store;

pub use domain::{
    parse_timestamp, BestConfig, GroupKey, MetricValue, ParamSet, StoreKind, TrialContext,
    TrialMetrics, TrialRecord, METRIC_FIELDS,
};
pub use store::{LoadReport, LogStore, RecordCorrupt, SqliteStore, StoreUnavailable, TrialStore};

//! Result store adapters and their error taxonomy.
//!
//! The optimizer writes every trial twice: to an append-only JSON log and to a
//! SQLite table. Both adapters normalize into the same [`TrialRecord`] shape so
//! everything downstream is store-agnostic.
//!
//! Failure isolation:
//! - [`StoreUnavailable`]: the store as a whole cannot be read. Fatal for that
//!   store only.
//! - [`RecordCorrupt`]: one record cannot be normalized. It is skipped and
//!   accumulated in the [`LoadReport`]; the load continues.

pub mod log_store;
pub mod sqlite_store;

pub use log_store::LogStore;
pub use sqlite_store::SqliteStore;

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::{StoreKind, TrialRecord};

/// The store could not be opened or read at all.
#[derive(Debug, Clone, Error)]
#[error("{store} store unavailable at {location}: {reason}")]
pub struct StoreUnavailable {
    pub store: StoreKind,
    pub location: String,
    pub reason: String,
}

impl StoreUnavailable {
    pub fn new(store: StoreKind, location: &Path, reason: impl Into<String>) -> Self {
        Self {
            store,
            location: location.display().to_string(),
            reason: reason.into(),
        }
    }
}

/// One record that was skipped during a load.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{store} record #{position}{}: {reason}", describe_id(.test_id))]
pub struct RecordCorrupt {
    pub store: StoreKind,
    /// Zero-based position of the record in the store's read order.
    pub position: usize,
    pub test_id: Option<String>,
    pub reason: String,
}

fn describe_id(test_id: &Option<String>) -> String {
    test_id
        .as_deref()
        .map(|id| format!(" (test_id {id})"))
        .unwrap_or_default()
}

/// Outcome of a successful store load: records plus everything that was skipped.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub store: StoreKind,
    pub records: Vec<TrialRecord>,
    pub corrupt: Vec<RecordCorrupt>,
    /// Non-fatal anomalies (record kept, some field defaulted).
    pub warnings: Vec<String>,
    seen_ids: HashSet<String>,
}

impl LoadReport {
    pub fn new(store: StoreKind) -> Self {
        Self {
            store,
            records: Vec::new(),
            corrupt: Vec::new(),
            warnings: Vec::new(),
            seen_ids: HashSet::new(),
        }
    }

    /// Accept a normalized record, enforcing `test_id` uniqueness within the store.
    ///
    /// A repeated `test_id` is recorded as corrupt and the first occurrence wins.
    pub fn accept(&mut self, position: usize, record: TrialRecord) {
        if !self.seen_ids.insert(record.test_id.clone()) {
            let test_id = record.test_id;
            self.skip(position, Some(test_id), "duplicate test_id within store");
            return;
        }
        self.records.push(record);
    }

    /// Record a skipped record.
    pub fn skip(&mut self, position: usize, test_id: Option<String>, reason: impl Into<String>) {
        let corrupt = RecordCorrupt {
            store: self.store,
            position,
            test_id,
            reason: reason.into(),
        };
        warn!(store = %self.store, "skipping record: {corrupt}");
        self.corrupt.push(corrupt);
    }

    /// Record a non-fatal anomaly.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(store = %self.store, "{message}");
        self.warnings.push(message);
    }

    /// Latest parseable trial timestamp, as stored.
    pub fn latest_timestamp(&self) -> Option<&str> {
        self.records
            .iter()
            .filter_map(|r| r.recorded_at().map(|t| (t, r.timestamp.as_str())))
            .max_by_key(|(t, _)| *t)
            .map(|(_, raw)| raw)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A readable source of trial records.
pub trait TrialStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// File backing the store.
    fn location(&self) -> &Path;

    /// Read and normalize every record.
    ///
    /// Per-record problems end up in [`LoadReport::corrupt`] or
    /// [`LoadReport::warnings`]; only whole-store failures return `Err`.
    fn load_all(&self) -> Result<LoadReport, StoreUnavailable>;
}

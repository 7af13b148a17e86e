//! Store status: what each store looked like when it was loaded.

use std::path::Path;

use bestparams_core::{parse_timestamp, LoadReport, StoreKind, StoreUnavailable};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatus {
    pub store: StoreKind,
    pub location: String,
    /// File modification time, if the file exists.
    pub modified: Option<DateTime<Utc>>,
    pub records: usize,
    pub skipped: usize,
    pub warnings: usize,
    /// Latest parseable trial timestamp, as stored.
    pub latest_trial: Option<String>,
    /// Why the store could not be read at all.
    pub unavailable: Option<String>,
}

impl StoreStatus {
    pub fn from_load(store: StoreKind, path: &Path, load: &Result<LoadReport, StoreUnavailable>) -> Self {
        let mut status = Self {
            store,
            location: path.display().to_string(),
            modified: file_modified(path),
            records: 0,
            skipped: 0,
            warnings: 0,
            latest_trial: None,
            unavailable: None,
        };
        match load {
            Ok(report) => {
                status.records = report.len();
                status.skipped = report.corrupt.len();
                status.warnings = report.warnings.len();
                status.latest_trial = report.latest_timestamp().map(str::to_string);
            }
            Err(e) => status.unavailable = Some(e.reason.clone()),
        }
        status
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }
}

pub fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Which store holds the most recent trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Both stores' latest trials carry the same timestamp.
    Even,
    Ahead(StoreKind),
    /// At least one store has no readable timestamp.
    Unknown,
}

pub fn freshness(log: &StoreStatus, relational: &StoreStatus) -> Freshness {
    let latest = |s: &StoreStatus| s.latest_trial.as_deref().and_then(parse_timestamp);
    match (latest(log), latest(relational)) {
        (Some(l), Some(r)) if l > r => Freshness::Ahead(StoreKind::Log),
        (Some(l), Some(r)) if l < r => Freshness::Ahead(StoreKind::Relational),
        (Some(_), Some(_)) => Freshness::Even,
        _ => Freshness::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bestparams_core::{ParamSet, TrialContext, TrialMetrics, TrialRecord};

    fn make_report(store: StoreKind, timestamps: &[&str]) -> LoadReport {
        let mut report = LoadReport::new(store);
        for (i, ts) in timestamps.iter().enumerate() {
            report.accept(
                i,
                TrialRecord {
                    test_id: format!("t{i}"),
                    strategy_type: "MA".into(),
                    symbol: "BTCUSDT".into(),
                    params: ParamSet::new(),
                    metrics: TrialMetrics::default(),
                    timestamp: ts.to_string(),
                    source: store,
                    context: TrialContext::default(),
                },
            );
        }
        report.skip(timestamps.len(), None, "bad");
        report
    }

    #[test]
    fn loaded_store_status() {
        let load = Ok(make_report(StoreKind::Log, &["2024-01-01T00:00:00", "2024-03-01T00:00:00"]));
        let status = StoreStatus::from_load(StoreKind::Log, Path::new("/nonexistent/log.json"), &load);
        assert!(status.is_available());
        assert_eq!(status.records, 2);
        assert_eq!(status.skipped, 1);
        assert_eq!(status.latest_trial.as_deref(), Some("2024-03-01T00:00:00"));
        assert_eq!(status.modified, None);
    }

    #[test]
    fn unavailable_store_status() {
        let path = Path::new("/nonexistent/results.db");
        let load = Err(StoreUnavailable::new(StoreKind::Relational, path, "no such file"));
        let status = StoreStatus::from_load(StoreKind::Relational, path, &load);
        assert!(!status.is_available());
        assert_eq!(status.unavailable.as_deref(), Some("no such file"));
        assert_eq!(status.records, 0);
    }

    #[test]
    fn modified_time_is_read_for_existing_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(file_modified(file.path()).is_some());
    }

    #[test]
    fn freshness_compares_latest_trials() {
        let path = Path::new("x");
        let log = StoreStatus::from_load(
            StoreKind::Log,
            path,
            &Ok(make_report(StoreKind::Log, &["2024-05-01T00:00:00"])),
        );
        let rel = StoreStatus::from_load(
            StoreKind::Relational,
            path,
            &Ok(make_report(StoreKind::Relational, &["2024-05-01 00:00:00"])),
        );
        assert_eq!(freshness(&log, &rel), Freshness::Even);

        let newer = StoreStatus::from_load(
            StoreKind::Relational,
            path,
            &Ok(make_report(StoreKind::Relational, &["2024-06-01"])),
        );
        assert_eq!(freshness(&log, &newer), Freshness::Ahead(StoreKind::Relational));

        let empty = StoreStatus::from_load(StoreKind::Relational, path, &Ok(LoadReport::new(StoreKind::Relational)));
        assert_eq!(freshness(&log, &empty), Freshness::Unknown);
    }
}

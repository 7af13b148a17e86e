//! Reconciliation pipeline: load both stores, rank, compare, export.
//!
//! Stages:
//! 1. [`load_stores`] reads both stores in parallel. Each side is either a
//!    [`LoadReport`] or a [`StoreUnavailable`]; one failing store never stops
//!    the other.
//! 2. [`reconcile`] is pure: per-store winners, divergence report, export
//!    selection.
//! 3. [`run`] does the I/O: atomic artifact write plus optional audit outputs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bestparams_core::{LoadReport, StoreKind, StoreUnavailable, TrialRecord, TrialStore};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit;
use crate::config::{ConfigError, ReconcileConfig, StoresConfig, Tolerance};
use crate::divergence::{compare, Classification, DivergenceReport};
use crate::export::{export, ArtifactWrite, Export, ExportError};
use crate::ranking::{select_best, BestByGroup};
use crate::status::StoreStatus;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no store available: {log}; {relational}")]
    NoStoreAvailable {
        log: StoreUnavailable,
        relational: StoreUnavailable,
    },

    #[error("no trial groups found in either store; previous artifact left untouched")]
    NothingToExport,

    #[error("artifact export failed: {0}")]
    Export(#[from] ExportError),

    #[error("failed to write audit report {path}: {reason}")]
    Report { path: String, reason: String },
}

// ─── Loading ─────────────────────────────────────────────────────────

/// One store after loading.
#[derive(Debug, Clone)]
pub struct LoadedStore {
    pub status: StoreStatus,
    pub load: Result<LoadReport, StoreUnavailable>,
}

impl LoadedStore {
    pub fn load(store: &dyn TrialStore) -> Self {
        let load = store.load_all();
        if let Err(e) = &load {
            warn!(store = %store.kind(), "{e}");
        }
        let status = StoreStatus::from_load(store.kind(), store.location(), &load);
        Self { status, load }
    }

    /// Normalized records; empty when the store was unavailable.
    pub fn records(&self) -> &[TrialRecord] {
        match &self.load {
            Ok(report) => &report.records,
            Err(_) => &[],
        }
    }

    pub fn report(&self) -> Option<&LoadReport> {
        self.load.as_ref().ok()
    }
}

#[derive(Debug, Clone)]
pub struct LoadedStores {
    pub log: LoadedStore,
    pub relational: LoadedStore,
}

impl LoadedStores {
    pub fn get(&self, store: StoreKind) -> &LoadedStore {
        match store {
            StoreKind::Log => &self.log,
            StoreKind::Relational => &self.relational,
        }
    }

    pub fn skipped_records(&self) -> usize {
        StoreKind::ALL
            .iter()
            .filter_map(|k| self.get(*k).report())
            .map(|r| r.corrupt.len())
            .sum()
    }
}

/// Load both stores concurrently.
pub fn load_stores(stores: &StoresConfig) -> LoadedStores {
    let log_store = stores.log_store();
    let relational_store = stores.relational_store();
    let (log, relational) = rayon::join(
        || LoadedStore::load(&log_store),
        || LoadedStore::load(&relational_store),
    );
    LoadedStores { log, relational }
}

// ─── Reconciliation ──────────────────────────────────────────────────

/// Everything decided in one run, before anything is written.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub log_best: BestByGroup,
    pub relational_best: BestByGroup,
    pub report: DivergenceReport,
    pub export: Export,
    pub authoritative: StoreKind,
}

/// Rank both stores, compare the winners and select what to export.
pub fn reconcile(loaded: &LoadedStores, tolerance: Tolerance, authoritative: StoreKind) -> Reconciliation {
    let log_best = select_best(loaded.log.records());
    let relational_best = select_best(loaded.relational.records());
    let report = compare(&log_best, &relational_best, tolerance);
    let export = export(&report, authoritative);
    Reconciliation {
        log_best,
        relational_best,
        report,
        export,
        authoritative,
    }
}

// ─── Batch run ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub artifact: ArtifactWrite,
    pub groups: usize,
    pub counts: BTreeMap<Classification, usize>,
    pub skipped_records: usize,
    /// Stores that could not be read; the run went ahead with the other one.
    pub unavailable: Vec<StoreKind>,
    pub audit_report: Option<PathBuf>,
    pub audit_csv: Option<PathBuf>,
}

impl RunSummary {
    pub fn count(&self, classification: Classification) -> usize {
        self.counts.get(&classification).copied().unwrap_or(0)
    }

    pub fn conflicts(&self) -> usize {
        self.count(Classification::Diverged) + self.count(Classification::ParamsMismatch)
    }
}

/// Full batch run: load, reconcile, write the artifact and audit outputs.
pub fn run(config: &ReconcileConfig) -> Result<RunSummary, PipelineError> {
    config.validate()?;

    let loaded = load_stores(&config.stores);
    if let (Err(log), Err(relational)) = (&loaded.log.load, &loaded.relational.load) {
        return Err(PipelineError::NoStoreAvailable {
            log: log.clone(),
            relational: relational.clone(),
        });
    }

    let rec = reconcile(&loaded, config.reconcile.tolerance(), config.reconcile.authoritative);
    if rec.export.artifact.is_empty() {
        return Err(PipelineError::NothingToExport);
    }

    let artifact = rec.export.artifact.write_atomic(&config.output.artifact)?;

    let audit_report = match &config.output.audit_report {
        Some(path) => {
            let markdown = audit::render_markdown(&loaded, &rec);
            write_report(path, markdown.as_bytes())?;
            Some(path.clone())
        }
        None => None,
    };
    let audit_csv = match &config.output.audit_csv {
        Some(path) => {
            let csv = audit::render_csv(&rec).map_err(|e| report_error(path, e))?;
            write_report(path, csv.as_bytes())?;
            Some(path.clone())
        }
        None => None,
    };

    let counts = Classification::ALL
        .iter()
        .map(|c| (*c, rec.report.count(*c)))
        .collect();
    let unavailable = StoreKind::ALL
        .into_iter()
        .filter(|k| !loaded.get(*k).status.is_available())
        .collect();

    let summary = RunSummary {
        artifact,
        groups: rec.report.len(),
        counts,
        skipped_records: loaded.skipped_records(),
        unavailable,
        audit_report,
        audit_csv,
    };
    info!(
        groups = summary.groups,
        conflicts = summary.conflicts(),
        skipped = summary.skipped_records,
        unchanged = summary.artifact.unchanged,
        "reconciliation complete"
    );
    Ok(summary)
}

fn write_report(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| report_error(path, e))?;
    }
    fs::write(path, bytes).map_err(|e| report_error(path, e))?;
    info!(path = %path.display(), "wrote audit output");
    Ok(())
}

fn report_error(path: &Path, reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::Report {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bestparams_core::LogStore;
    use serde_json::json;

    fn write_log(dir: &Path, trials: serde_json::Value) -> PathBuf {
        let path = dir.join("optimization_results.json");
        fs::write(&path, trials.to_string()).unwrap();
        path
    }

    fn trial(test_id: &str, symbol: &str, total_return: f64) -> serde_json::Value {
        json!({
            "test_id": test_id,
            "strategy_type": "MA",
            "symbol": symbol,
            "params": {"short_window": 5},
            "metrics": {"total_return": total_return},
            "timestamp": "2024-01-01T00:00:00"
        })
    }

    #[test]
    fn unavailable_store_contributes_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LoadedStore::load(&LogStore::new(dir.path().join("missing.json")));
        assert!(loaded.records().is_empty());
        assert!(!loaded.status.is_available());
    }

    #[test]
    fn reconcile_with_one_store_is_all_source_only() {
        let dir = tempfile::tempdir().unwrap();
        let stores = StoresConfig {
            log_path: write_log(dir.path(), json!([trial("a", "BTCUSDT", 1.0), trial("b", "ETHUSDT", 2.0)])),
            relational_path: dir.path().join("missing.db"),
            ..StoresConfig::default()
        };
        let loaded = load_stores(&stores);
        let rec = reconcile(&loaded, Tolerance::default(), StoreKind::Relational);
        assert_eq!(rec.report.count(Classification::SourceOnly), 2);
        assert_eq!(rec.export.artifact.len(), 2);
        assert!(rec.relational_best.is_empty());
    }

    #[test]
    fn run_fails_when_both_stores_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReconcileConfig::default();
        config.stores.log_path = dir.path().join("missing.json");
        config.stores.relational_path = dir.path().join("missing.db");
        config.output.artifact = dir.path().join("best.json");

        let err = run(&config).unwrap_err();
        assert!(matches!(err, PipelineError::NoStoreAvailable { .. }));
        assert!(!config.output.artifact.exists());
    }

    #[test]
    fn run_refuses_to_write_an_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReconcileConfig::default();
        config.stores.log_path = write_log(dir.path(), json!([]));
        config.stores.relational_path = dir.path().join("missing.db");
        config.output.artifact = dir.path().join("best.json");

        assert!(matches!(run(&config), Err(PipelineError::NothingToExport)));
        assert!(!config.output.artifact.exists());
    }

    #[test]
    fn run_rejects_invalid_config() {
        let mut config = ReconcileConfig::default();
        config.reconcile.tolerance = -1.0;
        assert!(matches!(run(&config), Err(PipelineError::Config(_))));
    }

    #[test]
    fn run_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReconcileConfig::default();
        config.stores.log_path = write_log(dir.path(), json!([trial("a", "BTCUSDT", 1.0)]));
        config.stores.relational_path = dir.path().join("missing.db");
        config.output.artifact = dir.path().join("best.json");
        config.output.audit_report = Some(dir.path().join("audit").join("audit.md"));

        let summary = run(&config).unwrap();
        assert_eq!(summary.groups, 1);
        assert_eq!(summary.count(Classification::SourceOnly), 1);
        assert_eq!(summary.conflicts(), 0);
        assert_eq!(summary.unavailable, vec![StoreKind::Relational]);
        assert!(dir.path().join("audit").join("audit.md").exists());
        assert!(summary.audit_csv.is_none());
    }
}

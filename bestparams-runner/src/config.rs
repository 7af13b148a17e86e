//! Reconciliation configuration: TOML file with defaults for every key.
//!
//! ```toml
//! [stores]
//! log_path = "optimization_results.json"
//! relational_path = "optimization_results.db"
//! table = "optimization_results"
//! busy_timeout_ms = 5000
//!
//! [reconcile]
//! tolerance = 0.01
//! tolerance_mode = "absolute"
//! authoritative = "relational"
//!
//! [output]
//! artifact = "best_strategy_configs.json"
//! audit_report = "optimization_audit.md"
//! ```
//!
//! Command-line overrides are applied on top of the parsed file, then
//! [`ReconcileConfig::validate`] runs once on the merged result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bestparams_core::store::sqlite_store::{is_valid_table_name, DEFAULT_TABLE};
use bestparams_core::{LogStore, SqliteStore, StoreKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LOG_PATH: &str = "optimization_results.json";
pub const DEFAULT_RELATIONAL_PATH: &str = "optimization_results.db";
pub const DEFAULT_ARTIFACT_PATH: &str = "best_strategy_configs.json";
pub const DEFAULT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("tolerance must be a finite non-negative number, got {0}")]
    InvalidTolerance(f64),

    #[error("invalid table name {0:?}")]
    InvalidTable(String),
}

// ─── Tolerance ───────────────────────────────────────────────────────

/// How two `total_return` values are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceMode {
    /// Difference in percentage points.
    #[default]
    Absolute,
    /// Difference as a fraction of the larger magnitude.
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub threshold: f64,
    pub mode: ToleranceMode,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::absolute(DEFAULT_TOLERANCE)
    }
}

impl Tolerance {
    pub fn absolute(threshold: f64) -> Self {
        Self {
            threshold,
            mode: ToleranceMode::Absolute,
        }
    }

    pub fn relative(threshold: f64) -> Self {
        Self {
            threshold,
            mode: ToleranceMode::Relative,
        }
    }

    /// Whether `a` and `b` agree within this tolerance. The boundary is inclusive.
    pub fn within(&self, a: f64, b: f64) -> bool {
        let delta = (a - b).abs();
        match self.mode {
            ToleranceMode::Absolute => delta <= self.threshold,
            ToleranceMode::Relative => {
                let scale = a.abs().max(b.abs());
                delta == 0.0 || delta <= self.threshold * scale
            }
        }
    }
}

impl std::fmt::Display for Tolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            ToleranceMode::Absolute => write!(f, "±{} pp", self.threshold),
            ToleranceMode::Relative => write!(f, "±{}%", self.threshold * 100.0),
        }
    }
}

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoresConfig {
    pub log_path: PathBuf,
    pub relational_path: PathBuf,
    pub table: String,
    pub busy_timeout_ms: u64,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            log_path: DEFAULT_LOG_PATH.into(),
            relational_path: DEFAULT_RELATIONAL_PATH.into(),
            table: DEFAULT_TABLE.into(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoresConfig {
    pub fn log_store(&self) -> LogStore {
        LogStore::new(&self.log_path)
    }

    pub fn relational_store(&self) -> SqliteStore {
        SqliteStore::new(&self.relational_path)
            .with_table(&self.table)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    pub fn path_of(&self, store: StoreKind) -> &Path {
        match store {
            StoreKind::Log => &self.log_path,
            StoreKind::Relational => &self.relational_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub tolerance: f64,
    pub tolerance_mode: ToleranceMode,
    /// Store whose winner is exported when the two disagree.
    pub authoritative: StoreKind,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            tolerance_mode: ToleranceMode::Absolute,
            authoritative: StoreKind::Relational,
        }
    }
}

impl ReconcileSettings {
    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            threshold: self.tolerance,
            mode: self.tolerance_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub artifact: PathBuf,
    pub audit_report: Option<PathBuf>,
    pub audit_csv: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifact: DEFAULT_ARTIFACT_PATH.into(),
            audit_report: None,
            audit_csv: None,
        }
    }
}

/// Complete configuration for one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub stores: StoresConfig,
    pub reconcile: ReconcileSettings,
    pub output: OutputConfig,
}

impl ReconcileConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.reconcile.tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(tolerance));
        }
        if !is_valid_table_name(&self.stores.table) {
            return Err(ConfigError::InvalidTable(self.stores.table.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = ReconcileConfig::from_toml("").unwrap();
        assert_eq!(cfg, ReconcileConfig::default());
        assert_eq!(cfg.reconcile.tolerance(), Tolerance::absolute(0.01));
        assert_eq!(cfg.reconcile.authoritative, StoreKind::Relational);
        assert_eq!(cfg.output.artifact, PathBuf::from("best_strategy_configs.json"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = ReconcileConfig::from_toml(
            r#"
            [stores]
            log_path = "/data/results.json"

            [reconcile]
            tolerance = 0.5
            tolerance_mode = "relative"
            authoritative = "log"

            [output]
            audit_report = "audit.md"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stores.log_path, PathBuf::from("/data/results.json"));
        assert_eq!(cfg.stores.table, "optimization_results");
        assert_eq!(cfg.stores.busy_timeout_ms, 5_000);
        assert_eq!(cfg.reconcile.tolerance(), Tolerance::relative(0.5));
        assert_eq!(cfg.reconcile.authoritative, StoreKind::Log);
        assert_eq!(cfg.output.audit_report, Some(PathBuf::from("audit.md")));
        assert_eq!(cfg.output.audit_csv, None);
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let err = ReconcileConfig::from_toml("[reconcile]\ntolerance_mode = \"fuzzy\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let mut cfg = ReconcileConfig::default();
        cfg.reconcile.tolerance = -0.1;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTolerance(_))));
        cfg.reconcile.tolerance = f64::NAN;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTolerance(_))));
    }

    #[test]
    fn bad_table_name_is_rejected() {
        let mut cfg = ReconcileConfig::default();
        cfg.stores.table = "results; DROP TABLE x".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTable(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReconcileConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn absolute_tolerance_boundary_is_inclusive() {
        let tol = Tolerance::absolute(0.5);
        assert!(tol.within(10.0, 10.5));
        assert!(!tol.within(10.0, 10.6));
        assert!(Tolerance::absolute(0.0).within(3.0, 3.0));
    }

    #[test]
    fn near_equal_returns_are_within_default_tolerance() {
        assert!(Tolerance::default().within(12.0, 12.005));
        assert!(!Tolerance::default().within(50.0, 10.0));
    }

    #[test]
    fn relative_tolerance_scales_with_magnitude() {
        let tol = Tolerance::relative(0.01);
        assert!(tol.within(100.0, 100.9));
        assert!(!tol.within(1.0, 1.5));
        assert!(tol.within(0.0, 0.0));
        assert!(!tol.within(0.0, 0.001));
    }
}

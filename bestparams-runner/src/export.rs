//! Canonical artifact export.
//!
//! Turns a [`DivergenceReport`] into the `best_strategy_configs.json` document
//! the trading engine loads at startup:
//!
//! ```json
//! {
//!   "MA": {
//!     "BTCUSDT": { "parameters": { ... }, "performance": { ... } }
//!   }
//! }
//! ```
//!
//! Selection policy:
//! - source-only groups export the only winner there is
//! - consistent groups export the authoritative store's winner
//! - diverged and params-mismatch groups export the authoritative store's
//!   winner and are kept as [`Conflict`]s for the audit report
//!
//! Serialization has sorted keys, pretty printing, a trailing newline and no
//! wall-clock content, so identical input produces identical bytes.
//! Writes are atomic: write to `<name>.tmp`, fsync, rename into place.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bestparams_core::{BestConfig, GroupKey, ParamSet, StoreKind, TrialMetrics};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::divergence::{Classification, DivergenceReport, GroupOutcome};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("artifact path {0} has no file name")]
    InvalidPath(String),

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("artifact {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ExportError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.display().to_string(),
            source,
        }
    }
}

// ─── Artifact ────────────────────────────────────────────────────────

/// One group's entry in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub parameters: ParamSet,
    pub performance: TrialMetrics,
}

/// `strategy_type → symbol → entry`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalArtifact(BTreeMap<String, BTreeMap<String, ArtifactEntry>>);

/// Result of [`CanonicalArtifact::write_atomic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactWrite {
    pub path: PathBuf,
    /// BLAKE3 hex digest of the artifact bytes.
    pub digest: String,
    /// The file already held exactly these bytes; nothing was rewritten.
    pub unchanged: bool,
}

impl CanonicalArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: &BestConfig) {
        self.0
            .entry(config.group_key.strategy_type.clone())
            .or_default()
            .insert(
                config.group_key.symbol.clone(),
                ArtifactEntry {
                    parameters: config.parameters.clone(),
                    performance: config.performance,
                },
            );
    }

    pub fn get(&self, key: &GroupKey) -> Option<&ArtifactEntry> {
        self.0.get(&key.strategy_type)?.get(&key.symbol)
    }

    /// Every `(group, entry)` in key order.
    pub fn entries(&self) -> impl Iterator<Item = (GroupKey, &ArtifactEntry)> {
        self.0.iter().flat_map(|(strategy, symbols)| {
            symbols
                .iter()
                .map(move |(symbol, entry)| (GroupKey::new(strategy, symbol), entry))
        })
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical bytes: pretty JSON, every object's keys sorted, trailing newline.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ExportError> {
        // Going through `Value` sorts struct fields too, not only map keys.
        let value = serde_json::to_value(self)?;
        let mut bytes = serde_json::to_vec_pretty(&value)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn digest(&self) -> Result<String, ExportError> {
        Ok(digest_of(&self.to_json_bytes()?))
    }

    /// Write the artifact to `path` atomically.
    ///
    /// On failure the temporary file is removed and any previous artifact at
    /// `path` is left untouched.
    pub fn write_atomic(&self, path: &Path) -> Result<ArtifactWrite, ExportError> {
        let bytes = self.to_json_bytes()?;
        let digest = digest_of(&bytes);

        if fs::read(path).is_ok_and(|existing| existing == bytes) {
            info!(path = %path.display(), %digest, "artifact unchanged");
            return Ok(ArtifactWrite {
                path: path.to_path_buf(),
                digest,
                unchanged: true,
            });
        }

        let tmp_path = tmp_path_for(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ExportError::io("create directory", parent, e))?;
        }

        let result = write_synced(&tmp_path, &bytes)
            .and_then(|()| fs::rename(&tmp_path, path).map_err(|e| ExportError::io("rename to", path, e)));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        info!(path = %path.display(), groups = self.len(), %digest, "wrote artifact");
        Ok(ArtifactWrite {
            path: path.to_path_buf(),
            digest,
            unchanged: false,
        })
    }

    /// Read an artifact back the way the trading engine does at startup.
    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let content = fs::read_to_string(path).map_err(|e| ExportError::io("read", path, e))?;
        serde_json::from_str(&content).map_err(|source| ExportError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

fn digest_of(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn tmp_path_for(path: &Path) -> Result<PathBuf, ExportError> {
    let mut name = path
        .file_name()
        .ok_or_else(|| ExportError::InvalidPath(path.display().to_string()))?
        .to_os_string();
    name.push(".tmp");
    Ok(path.with_file_name(name))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let mut file = File::create(path).map_err(|e| ExportError::io("create", path, e))?;
    file.write_all(bytes)
        .map_err(|e| ExportError::io("write", path, e))?;
    file.sync_all().map_err(|e| ExportError::io("fsync", path, e))
}

// ─── Selection ───────────────────────────────────────────────────────

/// Which winner was exported for a group, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub key: GroupKey,
    pub classification: Classification,
    pub exported_from: StoreKind,
    pub test_id: String,
}

/// A group where the stores disagree. Both winners are kept for the audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub key: GroupKey,
    pub classification: Classification,
    pub log: BestConfig,
    pub relational: BestConfig,
    pub delta: f64,
    pub exported_from: StoreKind,
}

/// Output of [`export`]: the artifact plus the per-group decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub artifact: CanonicalArtifact,
    pub selections: Vec<Selection>,
    pub conflicts: Vec<Conflict>,
}

/// Choose one winner per group and build the canonical artifact.
pub fn export(report: &DivergenceReport, authoritative: StoreKind) -> Export {
    let mut artifact = CanonicalArtifact::new();
    let mut selections = Vec::with_capacity(report.len());
    let mut conflicts = Vec::new();

    for group in &report.groups {
        let classification = group.outcome.classification();
        let (config, exported_from) = match &group.outcome {
            GroupOutcome::SourceOnly { store, config } => (config, *store),
            GroupOutcome::Consistent(pair) => (pair.from_store(authoritative), authoritative),
            GroupOutcome::Diverged(pair) | GroupOutcome::ParamsMismatch(pair) => {
                warn!(
                    group = %group.key,
                    %classification,
                    log_return = pair.log.total_return(),
                    relational_return = pair.relational.total_return(),
                    exported_from = %authoritative,
                    "stores disagree"
                );
                conflicts.push(Conflict {
                    key: group.key.clone(),
                    classification,
                    log: pair.log.clone(),
                    relational: pair.relational.clone(),
                    delta: pair.delta,
                    exported_from: authoritative,
                });
                (pair.from_store(authoritative), authoritative)
            }
        };

        artifact.insert(config);
        selections.push(Selection {
            key: group.key.clone(),
            classification,
            exported_from,
            test_id: config.test_id.clone(),
        });
    }

    Export {
        artifact,
        selections,
        conflicts,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

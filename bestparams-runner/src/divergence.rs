//! Divergence detection between the two stores' per-group winners.
//!
//! Every group present in either input gets exactly one outcome:
//! - `SourceOnly`: only one store has trials for the group
//! - `Diverged`: the winning `total_return` values differ beyond tolerance
//! - `ParamsMismatch`: returns agree but the winning parameters differ
//! - `Consistent`: returns agree and the parameters are the same
//!
//! Outcomes are data, not errors. Choosing what to export is the exporter's job.

use std::collections::BTreeSet;
use std::fmt;

use bestparams_core::{BestConfig, GroupKey, StoreKind};
use serde::Serialize;
use tracing::debug;

use crate::config::Tolerance;
use crate::ranking::BestByGroup;

/// Both stores' winners for a group that appears in both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinnerPair {
    pub log: BestConfig,
    pub relational: BestConfig,
    /// `|log.total_return - relational.total_return|`.
    pub delta: f64,
}

impl WinnerPair {
    fn new(log: BestConfig, relational: BestConfig) -> Self {
        let delta = (log.total_return() - relational.total_return()).abs();
        Self {
            log,
            relational,
            delta,
        }
    }

    pub fn from_store(&self, store: StoreKind) -> &BestConfig {
        match store {
            StoreKind::Log => &self.log,
            StoreKind::Relational => &self.relational,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    SourceOnly { store: StoreKind, config: BestConfig },
    Consistent(WinnerPair),
    Diverged(WinnerPair),
    ParamsMismatch(WinnerPair),
}

/// Outcome tag without the payload, for counting and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    SourceOnly,
    Consistent,
    Diverged,
    ParamsMismatch,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::Consistent,
        Classification::Diverged,
        Classification::ParamsMismatch,
        Classification::SourceOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceOnly => "source-only",
            Self::Consistent => "consistent",
            Self::Diverged => "diverged",
            Self::ParamsMismatch => "params-mismatch",
        }
    }

    /// Whether the two stores disagree about this group.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Diverged | Self::ParamsMismatch)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GroupOutcome {
    pub fn classification(&self) -> Classification {
        match self {
            Self::SourceOnly { .. } => Classification::SourceOnly,
            Self::Consistent(_) => Classification::Consistent,
            Self::Diverged(_) => Classification::Diverged,
            Self::ParamsMismatch(_) => Classification::ParamsMismatch,
        }
    }

    /// The pair of winners, when both stores have the group.
    pub fn pair(&self) -> Option<&WinnerPair> {
        match self {
            Self::SourceOnly { .. } => None,
            Self::Consistent(p) | Self::Diverged(p) | Self::ParamsMismatch(p) => Some(p),
        }
    }

    /// This group's winner as seen by `store`, if that store has the group.
    pub fn config_from(&self, store: StoreKind) -> Option<&BestConfig> {
        match self {
            Self::SourceOnly { store: s, config } => (*s == store).then_some(config),
            _ => self.pair().map(|p| p.from_store(store)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupComparison {
    pub key: GroupKey,
    pub outcome: GroupOutcome,
}

/// Result of comparing both stores, ordered by group key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceReport {
    pub tolerance: Tolerance,
    pub groups: Vec<GroupComparison>,
}

impl DivergenceReport {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.groups
            .iter()
            .filter(|g| g.outcome.classification() == classification)
            .count()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &GroupComparison> {
        self.groups
            .iter()
            .filter(|g| g.outcome.classification().is_conflict())
    }

    pub fn get(&self, key: &GroupKey) -> Option<&GroupOutcome> {
        self.groups
            .binary_search_by(|g| g.key.cmp(key))
            .ok()
            .map(|i| &self.groups[i].outcome)
    }
}

/// Classify every group in the union of both inputs.
pub fn compare(
    log_best: &BestByGroup,
    relational_best: &BestByGroup,
    tolerance: Tolerance,
) -> DivergenceReport {
    let keys: BTreeSet<&GroupKey> = log_best.keys().chain(relational_best.keys()).collect();

    let groups = keys
        .into_iter()
        .filter_map(|key| {
            let outcome = match (log_best.get(key), relational_best.get(key)) {
                (Some(log), Some(rel)) => classify(log, rel, tolerance),
                (Some(log), None) => GroupOutcome::SourceOnly {
                    store: StoreKind::Log,
                    config: log.clone(),
                },
                (None, Some(rel)) => GroupOutcome::SourceOnly {
                    store: StoreKind::Relational,
                    config: rel.clone(),
                },
                (None, None) => return None,
            };
            debug!(group = %key, outcome = %outcome.classification(), "classified group");
            Some(GroupComparison {
                key: key.clone(),
                outcome,
            })
        })
        .collect();

    DivergenceReport { tolerance, groups }
}

fn classify(log: &BestConfig, rel: &BestConfig, tolerance: Tolerance) -> GroupOutcome {
    let pair = WinnerPair::new(log.clone(), rel.clone());
    if !tolerance.within(log.total_return(), rel.total_return()) {
        GroupOutcome::Diverged(pair)
    } else if !log.parameters.same_values(&rel.parameters) {
        GroupOutcome::ParamsMismatch(pair)
    } else {
        GroupOutcome::Consistent(pair)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

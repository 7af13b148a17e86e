use serde::{Deserialize, Serialize};

use super::ids::{GroupKey, StoreKind};
use super::metrics::TrialMetrics;
use super::params::ParamSet;
use super::trial::TrialRecord;

/// The winning trial of one group, as selected from one store.
///
/// Recomputed from scratch on every reconciliation run and superseded by the
/// next one; never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestConfig {
    pub group_key: GroupKey,
    /// `test_id` of the winning trial, kept for the audit trail.
    pub test_id: String,
    pub parameters: ParamSet,
    pub performance: TrialMetrics,
    pub source_timestamp: String,
    pub provenance: StoreKind,
}

impl BestConfig {
    pub fn from_trial(trial: &TrialRecord) -> Self {
        Self {
            group_key: trial.group_key(),
            test_id: trial.test_id.clone(),
            parameters: trial.params.clone(),
            performance: trial.metrics,
            source_timestamp: trial.timestamp.clone(),
            provenance: trial.source,
        }
    }

    pub fn total_return(&self) -> f64 {
        self.performance.total_return
    }
}

//! Grouping and ranking: one winner per `(strategy_type, symbol)`.
//!
//! Trials are ordered best-first by:
//! 1. `total_return` descending
//! 2. `sharpe_ratio` descending
//! 3. timestamp, most recent first (unparseable timestamps count as oldest)
//! 4. `test_id` ascending
//! 5. canonical parameter text ascending (only reachable for duplicated ids)
//!
//! Every function here is pure: the same records in any order produce the
//! same winners.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bestparams_core::{BestConfig, GroupKey, TrialRecord};

/// Winner per group, in group order.
pub type BestByGroup = BTreeMap<GroupKey, BestConfig>;

/// Best-first ordering of two trials. `Less` means `a` ranks ahead of `b`.
pub fn trial_order(a: &TrialRecord, b: &TrialRecord) -> Ordering {
    desc(a.metrics.total_return, b.metrics.total_return)
        .then_with(|| desc(a.metrics.sharpe_ratio, b.metrics.sharpe_ratio))
        .then_with(|| b.recorded_at().cmp(&a.recorded_at()))
        .then_with(|| a.test_id.cmp(&b.test_id))
        .then_with(|| a.params.to_json_text().cmp(&b.params.to_json_text()))
}

/// Descending float comparison. Equal values (including `0.0` vs `-0.0`)
/// compare equal so the next key decides; NaN falls back to IEEE total order.
fn desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or_else(|| b.total_cmp(&a))
}

/// Select the best trial of every group.
///
/// Empty input yields an empty map.
pub fn select_best(records: &[TrialRecord]) -> BestByGroup {
    let mut winners: BTreeMap<GroupKey, &TrialRecord> = BTreeMap::new();

    for record in records {
        winners
            .entry(record.group_key())
            .and_modify(|current| {
                if trial_order(record, current) == Ordering::Less {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    winners
        .into_iter()
        .map(|(key, trial)| (key, BestConfig::from_trial(trial)))
        .collect()
}

/// The top `top_n` trials of every group, best first.
pub fn rank_groups(records: &[TrialRecord], top_n: usize) -> BTreeMap<GroupKey, Vec<&TrialRecord>> {
    let mut groups: BTreeMap<GroupKey, Vec<&TrialRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.group_key()).or_default().push(record);
    }
    for trials in groups.values_mut() {
        trials.sort_by(|a, b| trial_order(a, b));
        trials.truncate(top_n);
    }
    groups.retain(|_, trials| !trials.is_empty());
    groups
}

// ─── Tests ───────────────────────────────────────────────────────────

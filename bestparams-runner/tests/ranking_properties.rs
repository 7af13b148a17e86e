//! Property tests for group winner selection.

use std::cmp::Ordering;

use bestparams_core::{ParamSet, StoreKind, TrialContext, TrialMetrics, TrialRecord};
use bestparams_runner::{compare, rank_groups, select_best, trial_order, Classification, Tolerance};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_trial() -> impl Strategy<Value = TrialRecord> {
    (
        prop::sample::select(vec!["MA", "RSI", "BB"]),
        prop::sample::select(vec!["BTCUSDT", "ETHUSDT"]),
        // Coarse values so ties on every ranking key actually happen.
        (-4i32..4).prop_map(|r| r as f64 * 2.5),
        (-2i32..3).prop_map(|s| s as f64 * 0.5),
        prop::sample::select(vec![
            "2024-01-01T00:00:00",
            "2024-02-01 09:30:00",
            "2024-03-01",
            "",
        ]),
        0u32..6,
    )
        .prop_map(|(strategy, symbol, total_return, sharpe, timestamp, window)| {
            let mut params = ParamSet::new();
            params.insert("window", window);
            TrialRecord {
                test_id: String::new(),
                strategy_type: strategy.into(),
                symbol: symbol.into(),
                params,
                metrics: TrialMetrics {
                    total_return,
                    sharpe_ratio: sharpe,
                    ..TrialMetrics::default()
                },
                timestamp: timestamp.into(),
                source: StoreKind::Log,
                context: TrialContext::default(),
            }
        })
}

/// Trials with unique ids, as a store guarantees.
fn arb_trials() -> impl Strategy<Value = Vec<TrialRecord>> {
    prop::collection::vec(arb_trial(), 0..40).prop_map(|mut trials| {
        for (i, t) in trials.iter_mut().enumerate() {
            t.test_id = format!("t{i:03}");
        }
        trials
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn winner_is_not_beaten_by_any_group_member(trials in arb_trials()) {
        let best = select_best(&trials);
        for t in &trials {
            let winner = &best[&t.group_key()];
            let winner_trial = trials.iter().find(|c| c.test_id == winner.test_id).unwrap();
            prop_assert!(trial_order(winner_trial, t) != Ordering::Greater);
            prop_assert!(winner.total_return() >= t.metrics.total_return);
        }
    }

    #[test]
    fn every_group_has_exactly_one_winner(trials in arb_trials()) {
        let best = select_best(&trials);
        let mut keys: Vec<_> = trials.iter().map(|t| t.group_key()).collect();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(best.keys().cloned().collect::<Vec<_>>(), keys);
        for (key, cfg) in &best {
            prop_assert_eq!(&cfg.group_key, key);
        }
    }

    #[test]
    fn selection_ignores_input_order(
        (trials, shuffled) in arb_trials().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        prop_assert_eq!(select_best(&trials), select_best(&shuffled));
    }

    #[test]
    fn top_one_matches_winner(trials in arb_trials()) {
        let best = select_best(&trials);
        let ranked = rank_groups(&trials, 1);
        prop_assert_eq!(ranked.len(), best.len());
        for (key, top) in &ranked {
            prop_assert_eq!(&top[0].test_id, &best[key].test_id);
        }
    }

    #[test]
    fn store_compared_with_itself_is_consistent(trials in arb_trials()) {
        let best = select_best(&trials);
        let report = compare(&best, &best, Tolerance::default());
        prop_assert_eq!(report.count(Classification::Consistent), best.len());
    }
}

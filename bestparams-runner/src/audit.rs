//! Audit report: Markdown document and CSV table describing a reconciliation.
//!
//! The Markdown report has:
//! - store status table plus which store holds the newest trial
//! - classification summary
//! - per-group table (returns from both stores, delta, classification,
//!   exported store)
//! - one section per conflict with both winners' parameters
//! - skipped-record list
//!
//! Both renderings depend only on their inputs.

use bestparams_core::{BestConfig, StoreKind};
use thiserror::Error;

use crate::divergence::Classification;
use crate::export::Selection;
use crate::pipeline::{LoadedStores, Reconciliation};
use crate::status::{freshness, Freshness, StoreStatus};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to flush CSV writer: {0}")]
    Flush(String),

    #[error("CSV output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

// ─── Markdown ────────────────────────────────────────────────────────

pub fn render_markdown(loaded: &LoadedStores, rec: &Reconciliation) -> String {
    let mut md = String::new();

    md.push_str("# Optimization Result Reconciliation\n\n");
    md.push_str(&format!("- Authoritative store: `{}`\n", rec.authoritative));
    md.push_str(&format!("- Tolerance: {}\n", rec.report.tolerance));

    // Stores
    md.push_str("\n## Stores\n\n");
    md.push_str("| Store | Location | Modified | Records | Skipped | Latest trial | Status |\n");
    md.push_str("|-------|----------|----------|---------|---------|--------------|--------|\n");
    for kind in StoreKind::ALL {
        md.push_str(&status_row(&loaded.get(kind).status));
    }
    let freshness_line = match freshness(&loaded.log.status, &loaded.relational.status) {
        Freshness::Even => "Both stores end with the same trial timestamp.".to_string(),
        Freshness::Ahead(store) => format!("The {store} store holds the most recent trial."),
        Freshness::Unknown => "Store freshness could not be compared.".to_string(),
    };
    md.push_str(&format!("\n{freshness_line}\n"));

    // Summary
    md.push_str("\n## Summary\n\n");
    md.push_str(&format!("- Groups: {}\n", rec.report.len()));
    for classification in Classification::ALL {
        md.push_str(&format!(
            "- {}: {}\n",
            classification,
            rec.report.count(classification)
        ));
    }
    md.push_str(&format!("- Skipped records: {}\n", loaded.skipped_records()));

    // Groups
    if !rec.report.is_empty() {
        md.push_str("\n## Groups\n\n");
        md.push_str("| Group | Log return | Relational return | Delta | Classification | Exported from |\n");
        md.push_str("|-------|------------|-------------------|-------|----------------|---------------|\n");
        for (group, selection) in rec.report.groups.iter().zip(&rec.export.selections) {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                cell(&group.key.to_string()),
                fmt_return(group.outcome.config_from(StoreKind::Log)),
                fmt_return(group.outcome.config_from(StoreKind::Relational)),
                group
                    .outcome
                    .pair()
                    .map(|p| format!("{:.4}", p.delta))
                    .unwrap_or_else(|| "n/a".into()),
                selection.classification,
                selection.exported_from,
            ));
        }
    }

    // Conflicts
    if !rec.export.conflicts.is_empty() {
        md.push_str("\n## Conflicts\n");
        for conflict in &rec.export.conflicts {
            md.push_str(&format!("\n### {} ({})\n\n", conflict.key, conflict.classification));
            md.push_str(&format!("- Delta: {:.4}\n", conflict.delta));
            md.push_str(&format!("- Exported from: `{}`\n\n", conflict.exported_from));
            md.push_str("| Store | Test ID | Return | Sharpe | Timestamp | Parameters |\n");
            md.push_str("|-------|---------|--------|--------|-----------|------------|\n");
            md.push_str(&config_row(&conflict.log));
            md.push_str(&config_row(&conflict.relational));
        }
    }

    // Skipped records
    let skipped: Vec<String> = StoreKind::ALL
        .iter()
        .filter_map(|k| loaded.get(*k).report())
        .flat_map(|r| r.corrupt.iter().map(|c| c.to_string()))
        .collect();
    if !skipped.is_empty() {
        md.push_str("\n## Skipped Records\n\n");
        for line in skipped {
            md.push_str(&format!("- {line}\n"));
        }
    }

    md
}

fn status_row(status: &StoreStatus) -> String {
    format!(
        "| {} | `{}` | {} | {} | {} | {} | {} |\n",
        status.store,
        cell(&status.location),
        status
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "n/a".into()),
        status.records,
        status.skipped,
        cell(status.latest_trial.as_deref().unwrap_or("n/a")),
        match &status.unavailable {
            None => "ok".to_string(),
            Some(reason) => format!("unavailable: {}", cell(reason)),
        }
    )
}

fn config_row(config: &BestConfig) -> String {
    format!(
        "| {} | {} | {:.4} | {:.4} | {} | `{}` |\n",
        config.provenance,
        cell(&config.test_id),
        config.performance.total_return,
        config.performance.sharpe_ratio,
        cell(&config.source_timestamp),
        cell(&config.parameters.to_json_text()),
    )
}

/// Escape `|` so a value cannot split a table cell.
fn cell(text: &str) -> String {
    text.replace('|', "\\|")
}

fn fmt_return(config: Option<&BestConfig>) -> String {
    config
        .map(|c| format!("{:.4}", c.total_return()))
        .unwrap_or_else(|| "n/a".into())
}

// ─── CSV ─────────────────────────────────────────────────────────────

/// One row per group.
///
/// Columns: strategy_type, symbol, classification, log_test_id,
/// log_total_return, relational_test_id, relational_total_return, delta,
/// exported_from, exported_test_id
pub fn render_csv(rec: &Reconciliation) -> Result<String, AuditError> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "strategy_type",
        "symbol",
        "classification",
        "log_test_id",
        "log_total_return",
        "relational_test_id",
        "relational_total_return",
        "delta",
        "exported_from",
        "exported_test_id",
    ])?;

    for (group, selection) in rec.report.groups.iter().zip(&rec.export.selections) {
        let log = group.outcome.config_from(StoreKind::Log);
        let rel = group.outcome.config_from(StoreKind::Relational);
        wtr.write_record(&csv_row(selection, log, rel, group.outcome.pair().map(|p| p.delta)))?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| AuditError::Flush(e.to_string()))?;
    Ok(String::from_utf8(data)?)
}

fn csv_row(
    selection: &Selection,
    log: Option<&BestConfig>,
    rel: Option<&BestConfig>,
    delta: Option<f64>,
) -> Vec<String> {
    let id = |c: Option<&BestConfig>| c.map(|c| c.test_id.clone()).unwrap_or_default();
    let ret = |c: Option<&BestConfig>| {
        c.map(|c| format!("{:.6}", c.total_return()))
            .unwrap_or_default()
    };
    vec![
        selection.key.strategy_type.clone(),
        selection.key.symbol.clone(),
        selection.classification.to_string(),
        id(log),
        ret(log),
        id(rel),
        ret(rel),
        delta.map(|d| format!("{d:.6}")).unwrap_or_default(),
        selection.exported_from.to_string(),
        selection.test_id.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tolerance;
    use crate::pipeline::{reconcile, LoadedStore};
    use crate::status::StoreStatus;
    use bestparams_core::{
        LoadReport, ParamSet, StoreUnavailable, TrialContext, TrialMetrics, TrialRecord,
    };
    use std::path::Path;

    fn make_trial(store: StoreKind, test_id: &str, symbol: &str, total_return: f64, period: i64) -> TrialRecord {
        let mut params = ParamSet::new();
        params.insert("period", period);
        TrialRecord {
            test_id: test_id.into(),
            strategy_type: "MA".into(),
            symbol: symbol.into(),
            params,
            metrics: TrialMetrics {
                total_return,
                ..TrialMetrics::default()
            },
            timestamp: "2024-01-01T00:00:00".into(),
            source: store,
            context: TrialContext::default(),
        }
    }

    fn make_loaded(store: StoreKind, trials: Vec<TrialRecord>) -> LoadedStore {
        let mut report = LoadReport::new(store);
        for (i, t) in trials.into_iter().enumerate() {
            report.accept(i, t);
        }
        let load = Ok(report);
        LoadedStore {
            status: StoreStatus::from_load(store, Path::new("/nonexistent"), &load),
            load,
        }
    }

    fn make_fixture() -> (LoadedStores, Reconciliation) {
        let mut log = make_loaded(
            StoreKind::Log,
            vec![
                make_trial(StoreKind::Log, "l1", "BTCUSDT", 50.0, 10),
                make_trial(StoreKind::Log, "l2", "ETHUSDT", 12.0, 5),
            ],
        );
        if let Ok(report) = &mut log.load {
            report.skip(2, Some("broken".into()), "missing field `metrics`");
        }
        let relational = make_loaded(
            StoreKind::Relational,
            vec![
                make_trial(StoreKind::Relational, "r1", "BTCUSDT", 10.0, 20),
                make_trial(StoreKind::Relational, "r2", "ETHUSDT", 12.005, 5),
            ],
        );
        let loaded = LoadedStores { log, relational };
        let rec = reconcile(&loaded, Tolerance::default(), StoreKind::Relational);
        (loaded, rec)
    }

    #[test]
    fn markdown_lists_groups_conflicts_and_skips() {
        let (loaded, rec) = make_fixture();
        let md = render_markdown(&loaded, &rec);

        assert!(md.starts_with("# Optimization Result Reconciliation"));
        assert!(md.contains("| MA / BTCUSDT | 50.0000 | 10.0000 | 40.0000 | diverged | relational |"));
        assert!(md.contains("| MA / ETHUSDT | 12.0000 | 12.0050 | 0.0050 | consistent | relational |"));
        assert!(md.contains("### MA / BTCUSDT (diverged)"));
        assert!(md.contains("`{\"period\":10}`"));
        assert!(md.contains("`{\"period\":20}`"));
        assert!(md.contains("## Skipped Records"));
        assert!(md.contains("test_id broken"));
        assert!(md.contains("- diverged: 1"));
        assert!(md.contains("- consistent: 1"));
    }

    #[test]
    fn markdown_is_deterministic() {
        let (loaded, rec) = make_fixture();
        assert_eq!(render_markdown(&loaded, &rec), render_markdown(&loaded, &rec));
    }

    #[test]
    fn unavailable_store_is_shown_in_status_table() {
        let (mut loaded, _) = make_fixture();
        let path = Path::new("/nonexistent/results.db");
        let load = Err(StoreUnavailable::new(StoreKind::Relational, path, "no such table"));
        loaded.relational = LoadedStore {
            status: StoreStatus::from_load(StoreKind::Relational, path, &load),
            load,
        };
        let rec = reconcile(&loaded, Tolerance::default(), StoreKind::Relational);
        let md = render_markdown(&loaded, &rec);
        assert!(md.contains("unavailable: no such table"));
        assert!(md.contains("- source-only: 2"));
        assert!(!md.contains("## Conflicts"));
    }

    #[test]
    fn pipes_in_table_values_are_escaped() {
        let mut log = make_trial(StoreKind::Log, "l|1", "BTC|USDT", 50.0, 10);
        log.params.insert("mode", "a|b");
        let rel = make_trial(StoreKind::Relational, "r1", "BTC|USDT", 10.0, 20);
        let loaded = LoadedStores {
            log: make_loaded(StoreKind::Log, vec![log]),
            relational: make_loaded(StoreKind::Relational, vec![rel]),
        };
        let rec = reconcile(&loaded, Tolerance::default(), StoreKind::Relational);
        let md = render_markdown(&loaded, &rec);

        assert!(md.contains("| MA / BTC\\|USDT | 50.0000 |"));
        assert!(md.contains("| log | l\\|1 |"));
        assert!(md.contains(r#"`{"mode":"a\|b","period":10}`"#));
        for line in md.lines().filter(|l| l.starts_with("| MA") || l.starts_with("| log | l")) {
            let unescaped = line.matches('|').count() - line.matches("\\|").count();
            assert_eq!(unescaped, 7, "{line}");
        }
    }

    #[test]
    fn csv_has_one_row_per_group() {
        let (_, rec) = make_fixture();
        let csv = render_csv(&rec).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("strategy_type,symbol,classification"));
        assert_eq!(
            lines[1],
            "MA,BTCUSDT,diverged,l1,50.000000,r1,10.000000,40.000000,relational,r1"
        );
    }
}

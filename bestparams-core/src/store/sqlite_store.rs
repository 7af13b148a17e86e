//! Relational (SQLite) trial table adapter.
//!
//! The optimizer's table carries one row per trial with `params` serialized as
//! JSON text. Columns are discovered with `PRAGMA table_info`, so older tables
//! missing some metric columns still load (absent metrics read as 0).
//!
//! The database is opened read-only with a bounded busy timeout; a lock held
//! longer than that surfaces as [`StoreUnavailable`], never as a hang.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

use super::{LoadReport, StoreUnavailable, TrialStore};
use crate::domain::{MetricValue, ParamSet, StoreKind, TrialContext, TrialMetrics, TrialRecord};

/// Table the optimizer writes trials to.
pub const DEFAULT_TABLE: &str = "optimization_results";

/// How long to wait on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

const REQUIRED_COLUMNS: [&str; 3] = ["test_id", "strategy_type", "symbol"];

/// Columns read, in SELECT order.
const SELECT_COLUMNS: [&str; 15] = [
    "test_id",
    "strategy_type",
    "symbol",
    "params",
    "total_return",
    "sharpe_ratio",
    "win_rate",
    "max_drawdown",
    "profit_factor",
    "total_trades",
    "avg_trade_duration",
    "timestamp",
    "trading_mode",
    "start_date",
    "end_date",
];

/// Reader for the SQLite trial table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    table: String,
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: DEFAULT_TABLE.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn unavailable(&self, reason: impl Into<String>) -> StoreUnavailable {
        StoreUnavailable::new(StoreKind::Relational, &self.path, reason)
    }

    fn open(&self) -> Result<Connection, StoreUnavailable> {
        if !is_valid_table_name(&self.table) {
            return Err(self.unavailable(format!("invalid table name '{}'", self.table)));
        }
        if !self.path.is_file() {
            return Err(self.unavailable("database file not found"));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| self.unavailable(format!("failed to open database: {e}")))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| self.unavailable(format!("failed to set busy timeout: {e}")))?;
        Ok(conn)
    }

    fn present_columns(&self, conn: &Connection) -> Result<HashSet<String>, StoreUnavailable> {
        let sql = format!("PRAGMA table_info(\"{}\")", self.table);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| self.unavailable(format!("failed to inspect table: {e}")))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .and_then(|rows| rows.collect::<Result<HashSet<_>, _>>())
            .map_err(|e| self.unavailable(format!("failed to inspect table: {e}")))?;

        if names.is_empty() {
            return Err(self.unavailable(format!("table '{}' does not exist", self.table)));
        }
        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !names.contains(**c)) {
            return Err(self.unavailable(format!(
                "table '{}' has no `{missing}` column",
                self.table
            )));
        }
        Ok(names)
    }

    fn select_sql(&self, present: &HashSet<String>) -> String {
        let columns: Vec<String> = SELECT_COLUMNS
            .iter()
            .map(|c| {
                if present.contains(*c) {
                    format!("\"{c}\"")
                } else {
                    format!("NULL AS \"{c}\"")
                }
            })
            .collect();
        format!("SELECT {} FROM \"{}\"", columns.join(", "), self.table)
    }
}

impl TrialStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn load_all(&self) -> Result<LoadReport, StoreUnavailable> {
        let conn = self.open()?;
        let present = self.present_columns(&conn)?;
        let has_params = present.contains("params");

        let mut report = LoadReport::new(StoreKind::Relational);
        if !has_params {
            report.warn(format!(
                "table '{}' has no `params` column; all parameter sets are empty",
                self.table
            ));
        }

        let sql = self.select_sql(&present);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| self.unavailable(format!("failed to prepare query: {e}")))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| self.unavailable(format!("query failed: {e}")))?;

        let mut position = 0usize;
        while let Some(row) = rows
            .next()
            .map_err(|e| self.unavailable(format!("read failed: {e}")))?
        {
            let values = (0..SELECT_COLUMNS.len())
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.unavailable(format!("read failed: {e}")))?;
            let raw = RawRow(SELECT_COLUMNS.into_iter().zip(values).collect());

            match raw.to_record(has_params) {
                Ok((record, warnings)) => {
                    for w in warnings {
                        report.warn(format!(
                            "relational record #{position} ({}): {w}",
                            record.test_id
                        ));
                    }
                    report.accept(position, record);
                }
                Err(reason) => {
                    let test_id = text_value(raw.get("test_id"), "test_id").ok();
                    report.skip(position, test_id, reason);
                }
            }
            position += 1;
        }

        info!(
            path = %self.path.display(),
            table = %self.table,
            records = report.len(),
            skipped = report.corrupt.len(),
            "loaded trial table"
        );
        Ok(report)
    }
}

/// SQLite identifiers accepted for the table name: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

static NULL: SqlValue = SqlValue::Null;

/// One selected row, keyed by column name.
struct RawRow(HashMap<&'static str, SqlValue>);

impl RawRow {
    fn get(&self, column: &str) -> &SqlValue {
        self.0.get(column).unwrap_or(&NULL)
    }

    fn to_record(&self, has_params: bool) -> Result<(TrialRecord, Vec<String>), String> {
        let mut warnings = Vec::new();

        let test_id = text_value(self.get("test_id"), "test_id")?;
        let strategy_type = text_value(self.get("strategy_type"), "strategy_type")?;
        let symbol = text_value(self.get("symbol"), "symbol")?;
        let metrics = TrialMetrics::from_fields(|name| metric_value(self.get(name)))?;

        let params = if has_params {
            match decode_params(self.get("params")) {
                Ok(p) => p,
                Err(reason) => {
                    warnings.push(format!("{reason}; using empty parameter set"));
                    ParamSet::new()
                }
            }
        } else {
            ParamSet::new()
        };

        let timestamp = match self.get("timestamp") {
            SqlValue::Text(s) => s.clone(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(r) => r.to_string(),
            SqlValue::Null | SqlValue::Blob(_) => {
                warnings.push("missing timestamp, treated as oldest".to_string());
                String::new()
            }
        };

        let context = TrialContext {
            trading_mode: optional_text(self.get("trading_mode")),
            start_date: optional_text(self.get("start_date")),
            end_date: optional_text(self.get("end_date")),
        };

        Ok((
            TrialRecord {
                test_id,
                strategy_type,
                symbol,
                params,
                metrics,
                timestamp,
                source: StoreKind::Relational,
                context,
            },
            warnings,
        ))
    }
}

fn text_value(value: &SqlValue, column: &str) -> Result<String, String> {
    match value {
        SqlValue::Text(s) => Ok(s.clone()),
        SqlValue::Integer(i) => Ok(i.to_string()),
        SqlValue::Null => Err(format!("`{column}` is NULL")),
        SqlValue::Real(_) => Err(format!("`{column}` is REAL, not TEXT")),
        SqlValue::Blob(_) => Err(format!("`{column}` is a BLOB, not TEXT")),
    }
}

fn optional_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s.clone()),
        _ => None,
    }
}

fn metric_value(value: &SqlValue) -> MetricValue {
    match value {
        SqlValue::Null => MetricValue::Missing,
        SqlValue::Integer(i) => MetricValue::Number(*i as f64),
        SqlValue::Real(r) => MetricValue::Number(*r),
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(MetricValue::Number)
            .unwrap_or_else(|_| MetricValue::Invalid(format!("text '{s}'"))),
        SqlValue::Blob(_) => MetricValue::Invalid("a BLOB".into()),
    }
}

fn decode_params(value: &SqlValue) -> Result<ParamSet, String> {
    match value {
        SqlValue::Text(text) => ParamSet::from_json_text(text)
            .map_err(|e| format!("params could not be decoded ({e})")),
        SqlValue::Blob(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| e.to_string())
            .and_then(ParamSet::from_json_text)
            .map_err(|e| format!("params could not be decoded ({e})")),
        SqlValue::Null => Err("params is NULL".into()),
        SqlValue::Integer(_) | SqlValue::Real(_) => Err("params is a number".into()),
    }
}

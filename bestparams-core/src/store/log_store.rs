//! Append-only JSON trial log adapter.
//!
//! Two layouts are read:
//! - a JSON array of trial objects (what the optimizer writes), and
//! - JSON Lines, one trial object per line.
//!
//! The optimizer writes non-finite floats as the bare tokens `NaN`,
//! `Infinity` and `-Infinity`, which are not JSON. They are quoted before
//! parsing so they reach the metric decoder as text instead of failing the
//! whole document.
//!
//! For an array document a top-level parse failure makes the whole store
//! unavailable. In JSON Lines a malformed line only costs that one record,
//! but a file where no line holds a JSON object is unavailable too.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use super::{LoadReport, StoreUnavailable, TrialStore};
use crate::domain::params::kind_of;
use crate::domain::{MetricValue, ParamSet, StoreKind, TrialContext, TrialMetrics, TrialRecord};

/// Reader for the JSON trial log.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse log content that has already been read into memory.
    pub fn parse(&self, content: &str) -> Result<LoadReport, StoreUnavailable> {
        let mut report = LoadReport::new(StoreKind::Log);
        let content = quote_non_finite(content);
        let trimmed = content.trim_start();

        if trimmed.is_empty() {
            report.warn("trial log is empty");
        } else if trimmed.starts_with('[') {
            let elements: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
                StoreUnavailable::new(StoreKind::Log, &self.path, format!("invalid JSON: {e}"))
            })?;
            for (position, element) in elements.into_iter().enumerate() {
                ingest(&mut report, position, element);
            }
        } else {
            let lines: Vec<_> = content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(serde_json::from_str::<Value>)
                .collect();
            if !lines.iter().any(|l| matches!(l, Ok(Value::Object(_)))) {
                return Err(StoreUnavailable::new(
                    StoreKind::Log,
                    &self.path,
                    "not a JSON array and no line holds a JSON object",
                ));
            }
            for (position, line) in lines.into_iter().enumerate() {
                match line {
                    Ok(element) => ingest(&mut report, position, element),
                    Err(e) => report.skip(position, None, format!("invalid JSON line: {e}")),
                }
            }
        }

        Ok(report)
    }
}

/// Quote bare `NaN`, `Infinity` and `-Infinity` tokens outside string literals.
fn quote_non_finite(content: &str) -> Cow<'_, str> {
    if !content.contains("NaN") && !content.contains("Infinity") {
        return Cow::Borrowed(content);
    }

    let mut out = String::with_capacity(content.len() + 16);
    let mut rest = content;
    let mut in_string = false;
    while let Some(c) = rest.chars().next() {
        if in_string {
            match c {
                '\\' => {
                    // Copy the escape and the escaped char as one unit.
                    let len = rest[1..].chars().next().map_or(1, |e| 1 + e.len_utf8());
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                    continue;
                }
                // JSON strings never span lines; recover after a torn line.
                '"' | '\n' => in_string = false,
                _ => {}
            }
        } else {
            if c == '"' {
                in_string = true;
            } else if let Some(token) = ["-Infinity", "Infinity", "NaN"]
                .into_iter()
                .find(|t| rest.starts_with(t))
            {
                out.push('"');
                out.push_str(token);
                out.push('"');
                rest = &rest[token.len()..];
                continue;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    Cow::Owned(out)
}

impl TrialStore for LogStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Log
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn load_all(&self) -> Result<LoadReport, StoreUnavailable> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| StoreUnavailable::new(StoreKind::Log, &self.path, e.to_string()))?;
        let report = self.parse(&content)?;
        info!(
            path = %self.path.display(),
            records = report.len(),
            skipped = report.corrupt.len(),
            "loaded trial log"
        );
        Ok(report)
    }
}

fn ingest(report: &mut LoadReport, position: usize, element: Value) {
    let test_id = element.get("test_id").and_then(id_text);
    match record_from_value(element) {
        Ok((record, warnings)) => {
            for w in warnings {
                report.warn(format!("log record #{position} ({}): {w}", record.test_id));
            }
            report.accept(position, record);
        }
        Err(reason) => report.skip(position, test_id, reason),
    }
}

/// Normalize one log element. Returns the record plus non-fatal warnings.
fn record_from_value(element: Value) -> Result<(TrialRecord, Vec<String>), String> {
    let mut obj = match element {
        Value::Object(obj) => obj,
        other => return Err(format!("expected an object, found {}", kind_of(&other))),
    };
    let mut warnings = Vec::new();

    let test_id = obj
        .get("test_id")
        .ok_or_else(|| "missing field `test_id`".to_string())
        .and_then(|v| id_text(v).ok_or_else(|| "`test_id` is not a string".to_string()))?;
    let strategy_type = required_string(&obj, "strategy_type")?;
    let symbol = required_string(&obj, "symbol")?;

    let params = match obj.remove("params") {
        Some(Value::Object(p)) => ParamSet::from_object(p),
        Some(other) => return Err(format!("`params` is {}, not an object", kind_of(&other))),
        None => return Err("missing field `params`".into()),
    };

    let metrics = match obj.get("metrics") {
        Some(Value::Object(m)) => TrialMetrics::from_fields(|name| metric_value(m, name))?,
        Some(other) => return Err(format!("`metrics` is {}, not an object", kind_of(other))),
        None => return Err("missing field `metrics`".into()),
    };

    let timestamp = match obj.get("timestamp") {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => {
            warnings.push("missing timestamp, treated as oldest".to_string());
            String::new()
        }
        Some(other) => return Err(format!("`timestamp` is {}, not a string", kind_of(other))),
    };

    let context = TrialContext {
        trading_mode: optional_string(&obj, "trading_mode"),
        start_date: optional_string(&obj, "start_date"),
        end_date: optional_string(&obj, "end_date"),
    };

    Ok((
        TrialRecord {
            test_id,
            strategy_type,
            symbol,
            params,
            metrics,
            timestamp,
            source: StoreKind::Log,
            context,
        },
        warnings,
    ))
}

/// `test_id` may be written as a string or an integer.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn required_string(obj: &Map<String, Value>, field: &str) -> Result<String, String> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("`{field}` is {}, not a string", kind_of(other))),
        None => Err(format!("missing field `{field}`")),
    }
}

fn optional_string(obj: &Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field).and_then(Value::as_str).map(str::to_string)
}

fn metric_value(metrics: &Map<String, Value>, name: &str) -> MetricValue {
    match metrics.get(name) {
        None | Some(Value::Null) => MetricValue::Missing,
        Some(Value::Number(n)) => n
            .as_f64()
            .map(MetricValue::Number)
            .unwrap_or_else(|| MetricValue::Invalid("an unrepresentable number".into())),
        Some(Value::String(s)) => match s.as_str() {
            "Infinity" => MetricValue::Number(f64::INFINITY),
            "-Infinity" => MetricValue::Number(f64::NEG_INFINITY),
            "NaN" => MetricValue::Number(f64::NAN),
            _ => MetricValue::Invalid(format!("text '{s}'")),
        },
        Some(other) => MetricValue::Invalid(kind_of(other).into()),
    }
}

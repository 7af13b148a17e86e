//! Fixed set of performance metrics reported for every trial.

use serde::{Deserialize, Serialize};

/// Names of the metric fields, in artifact order.
pub const METRIC_FIELDS: [&str; 7] = [
    "total_return",
    "sharpe_ratio",
    "win_rate",
    "max_drawdown",
    "profit_factor",
    "total_trades",
    "avg_trade_duration",
];

/// Metrics used as ranking keys. These must be finite.
pub const RANKING_FIELDS: [&str; 2] = ["total_return", "sharpe_ratio"];

/// Performance metrics of one trial.
///
/// Percentages are stored as percent values (12.5 means 12.5%), the way the
/// optimizer writes them. `max_drawdown` is signed negative.
///
/// Non-ranking metrics may be infinite: the optimizer reports
/// `profit_factor = inf` for a trial without losing trades. Infinities
/// serialize as the strings `"Infinity"` / `"-Infinity"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialMetrics {
    /// Total return in percent. Primary ranking key.
    #[serde(with = "extended_float")]
    pub total_return: f64,
    #[serde(with = "extended_float")]
    pub sharpe_ratio: f64,
    /// Win rate in percent.
    #[serde(with = "extended_float")]
    pub win_rate: f64,
    /// Maximum drawdown in percent (negative).
    #[serde(with = "extended_float")]
    pub max_drawdown: f64,
    #[serde(with = "extended_float")]
    pub profit_factor: f64,
    pub total_trades: u64,
    #[serde(with = "extended_float")]
    pub avg_trade_duration: f64,
}

/// A metric value as found in a store, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Field (or column) absent, or null.
    Missing,
    Number(f64),
    /// Present but not numeric; carries a short description of what was found.
    Invalid(String),
}

impl TrialMetrics {
    /// Normalize raw store values into metrics.
    ///
    /// Missing fields default to 0. NaN anywhere, an infinite ranking
    /// metric, a non-numeric value, or a `total_trades` that is not a
    /// non-negative integer is an error describing the offending field.
    pub fn from_fields<F>(mut field: F) -> Result<Self, String>
    where
        F: FnMut(&str) -> MetricValue,
    {
        let mut number = |name: &str| -> Result<f64, String> {
            match field(name) {
                MetricValue::Missing => Ok(0.0),
                MetricValue::Number(v) if v.is_nan() => Err(format!("metric `{name}` is NaN")),
                MetricValue::Number(v) if v.is_infinite() && RANKING_FIELDS.contains(&name) => {
                    Err(format!("ranking metric `{name}` is not finite ({v})"))
                }
                MetricValue::Number(v) => Ok(v),
                MetricValue::Invalid(found) => {
                    Err(format!("metric `{name}` is not numeric (found {found})"))
                }
            }
        };

        let total_return = number("total_return")?;
        let sharpe_ratio = number("sharpe_ratio")?;
        let win_rate = number("win_rate")?;
        let max_drawdown = number("max_drawdown")?;
        let profit_factor = number("profit_factor")?;
        let trades = number("total_trades")?;
        let avg_trade_duration = number("avg_trade_duration")?;

        if trades < 0.0 || trades.fract() != 0.0 || trades > u64::MAX as f64 {
            return Err(format!(
                "metric `total_trades` must be a non-negative integer (found {trades})"
            ));
        }

        Ok(Self {
            total_return,
            sharpe_ratio,
            win_rate,
            max_drawdown,
            profit_factor,
            total_trades: trades as u64,
            avg_trade_duration,
        })
    }
}

/// `f64` as a JSON number, or as `"Infinity"` / `"-Infinity"` / `"NaN"`
/// text when it is not finite. Plain JSON has no literal for those and
/// serde_json would otherwise write them as `null`.
mod extended_float {
    use serde::de::{self, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        const EXPECTED: &str = "a number or \"Infinity\", \"-Infinity\", \"NaN\"";
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| de::Error::custom(format!("number {n} is out of range"))),
            Value::String(s) => match s.as_str() {
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(de::Error::invalid_value(Unexpected::Str(other), &EXPECTED)),
            },
            other => Err(de::Error::invalid_type(unexpected(&other), &EXPECTED)),
        }
    }

    fn unexpected(value: &Value) -> Unexpected<'_> {
        match value {
            Value::Null => Unexpected::Unit,
            Value::Bool(b) => Unexpected::Bool(*b),
            Value::Array(_) => Unexpected::Seq,
            _ => Unexpected::Map,
        }
    }
}

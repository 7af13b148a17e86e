use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::ids::{GroupKey, StoreKind};
use super::metrics::TrialMetrics;
use super::params::ParamSet;

/// Run context the optimizer records alongside a trial. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// One completed backtest trial, normalized from either store.
///
/// Records are read-only views: nothing in this workspace writes them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Unique within its store; not across stores.
    pub test_id: String,
    pub strategy_type: String,
    pub symbol: String,
    pub params: ParamSet,
    pub metrics: TrialMetrics,
    /// Timestamp text exactly as stored. Empty if the store had none.
    pub timestamp: String,
    pub source: StoreKind,
    #[serde(default)]
    pub context: TrialContext,
}

impl TrialRecord {
    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.strategy_type.clone(), self.symbol.clone())
    }

    /// Whether this record belongs to `key`, without allocating a key.
    pub fn in_group(&self, key: &GroupKey) -> bool {
        self.strategy_type == key.strategy_type && self.symbol == key.symbol
    }

    /// Parsed timestamp, if the stored text is in a recognized format.
    pub fn recorded_at(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parse an ISO-8601-like timestamp.
///
/// Accepts RFC 3339 (converted to UTC), `YYYY-MM-DDTHH:MM:SS[.f]`,
/// `YYYY-MM-DD HH:MM:SS[.f]` and a bare `YYYY-MM-DD` (midnight).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_python_isoformat() {
        let dt = parse_timestamp("2024-03-05T14:22:31.123456").unwrap();
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.nanosecond(), 123_456_000);
    }

    #[test]
    fn parses_space_separated_and_date_only() {
        assert!(parse_timestamp("2024-03-05 14:22:31").is_some());
        let midnight = parse_timestamp("2024-03-05").unwrap();
        assert_eq!(midnight.hour(), 0);
    }

    #[test]
    fn rfc3339_is_normalized_to_utc() {
        let a = parse_timestamp("2024-03-05T14:00:00+02:00").unwrap();
        let b = parse_timestamp("2024-03-05T12:00:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn garbage_and_empty_do_not_parse() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }
}

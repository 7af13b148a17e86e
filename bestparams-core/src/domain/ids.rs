use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Grouping key for trials: `(strategy_type, symbol)`.
///
/// Equality is exact and case-sensitive on both fields. Ordering is by
/// strategy first, then symbol, which is also the order groups appear in
/// reports and in the exported artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub strategy_type: String,
    pub symbol: String,
}

impl GroupKey {
    pub fn new(strategy_type: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            strategy_type: strategy_type.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.strategy_type, self.symbol)
    }
}

/// Which of the two redundant result stores a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Append-only JSON trial log.
    Log,
    /// Relational table (SQLite).
    Relational,
}

impl StoreKind {
    pub const ALL: [StoreKind; 2] = [StoreKind::Log, StoreKind::Relational];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Relational => "relational",
        }
    }

    /// The store on the other side of a comparison.
    pub fn other(&self) -> StoreKind {
        match self {
            Self::Log => Self::Relational,
            Self::Relational => Self::Log,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "json" => Ok(Self::Log),
            "relational" | "db" | "sqlite" => Ok(Self::Relational),
            other => Err(format!(
                "unknown store '{other}' (expected 'log' or 'relational')"
            )),
        }
    }
}

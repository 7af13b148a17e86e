//! Domain types: trials, grouping keys, per-group winners.

pub mod best;
pub mod ids;
pub mod metrics;
pub mod params;
pub mod trial;

pub use best::BestConfig;
pub use ids::{GroupKey, StoreKind};
pub use metrics::{MetricValue, TrialMetrics, METRIC_FIELDS};
pub use params::ParamSet;
pub use trial::{parse_timestamp, TrialContext, TrialRecord};

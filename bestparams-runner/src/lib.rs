//! bestparams runner: ranking, divergence detection, canonical export.
//!
//! This crate contains:
//! - Run configuration (TOML) and return tolerance
//! - Grouping and ranking: one winner per `(strategy_type, symbol)` per store
//! - Divergence detection between the two stores' winners
//! - Canonical artifact export with atomic writes
//! - Audit reporting (Markdown, CSV) and store status
//! - The batch pipeline tying it together

pub mod audit;
pub mod config;
pub mod divergence;
pub mod export;
pub mod pipeline;
pub mod ranking;
pub mod status;

pub use config::{ConfigError, ReconcileConfig, Tolerance, ToleranceMode};
pub use divergence::{compare, Classification, DivergenceReport, GroupComparison, GroupOutcome};
pub use export::{export, ArtifactWrite, CanonicalArtifact, Conflict, Export, ExportError};
pub use pipeline::{load_stores, reconcile, run, LoadedStores, PipelineError, Reconciliation, RunSummary};
pub use ranking::{rank_groups, select_best, trial_order};
pub use status::StoreStatus;

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    /// Compile-time check: pipeline outputs can cross thread boundaries.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<LoadedStores>();
        require_sync::<LoadedStores>();
        require_send::<Reconciliation>();
        require_sync::<Reconciliation>();
        require_send::<CanonicalArtifact>();
        require_sync::<CanonicalArtifact>();
        require_send::<PipelineError>();
        require_sync::<PipelineError>();
    }
}

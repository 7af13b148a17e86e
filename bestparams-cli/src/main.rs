//! bestparams CLI: reconcile optimizer results into the canonical artifact.
//!
//! Commands:
//! - `reconcile`: full run: rank both stores, compare, write the artifact and audit outputs
//! - `compare`: same analysis, prints the audit report to stdout, writes nothing
//! - `view`: top-N trials per group from one store
//! - `status`: what each store holds and which one is newer

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bestparams_core::{GroupKey, StoreKind, TrialRecord};
use bestparams_runner::audit::render_markdown;
use bestparams_runner::pipeline::LoadedStore;
use bestparams_runner::status::{freshness, Freshness, StoreStatus};
use bestparams_runner::{
    load_stores, rank_groups, reconcile, run, Classification, ReconcileConfig, RunSummary,
    ToleranceMode,
};

#[derive(Parser)]
#[command(
    name = "bestparams",
    about = "Reconcile strategy optimization results into one best configuration per group"
)]
struct Cli {
    /// TOML config file. Command-line flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank both stores, classify every group and write the canonical artifact.
    Reconcile(ReconcileArgs),
    /// Classify every group and print the audit report without writing anything.
    Compare(ReconcileArgs),
    /// Show the top trials of every group in one store.
    View {
        #[command(flatten)]
        stores: StoreArgs,

        /// Store to read: log or relational.
        #[arg(long, default_value = "relational")]
        store: StoreKind,

        /// Trials to show per group.
        #[arg(long, default_value_t = 3)]
        top: usize,

        /// Only this strategy type.
        #[arg(long)]
        strategy: Option<String>,

        /// Only this symbol.
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Report file times, record counts and latest trial of each store.
    Status {
        #[command(flatten)]
        stores: StoreArgs,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// JSON trial log.
    #[arg(long)]
    log_store: Option<PathBuf>,

    /// SQLite database holding the trial table.
    #[arg(long)]
    relational_store: Option<PathBuf>,

    /// Trial table name.
    #[arg(long)]
    table: Option<String>,
}

#[derive(Args)]
struct ReconcileArgs {
    #[command(flatten)]
    stores: StoreArgs,

    /// Canonical artifact path.
    #[arg(long)]
    artifact: Option<PathBuf>,

    /// Write the Markdown audit report here.
    #[arg(long)]
    audit_report: Option<PathBuf>,

    /// Write the per-group audit CSV here.
    #[arg(long)]
    audit_csv: Option<PathBuf>,

    /// Maximum total_return difference still treated as agreement.
    #[arg(long)]
    tolerance: Option<f64>,

    /// Interpret --tolerance as a fraction of the larger return.
    #[arg(long, default_value_t = false)]
    relative: bool,

    /// Store exported when the two disagree: log or relational.
    #[arg(long)]
    authoritative: Option<StoreKind>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ReconcileConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ReconcileConfig::default(),
    };

    match cli.command {
        Commands::Reconcile(args) => {
            args.apply(&mut config);
            config.validate()?;
            debug!(?config, "effective configuration");
            run_reconcile(&config)
        }
        Commands::Compare(args) => {
            args.apply(&mut config);
            config.validate()?;
            debug!(?config, "effective configuration");
            run_compare(&config)
        }
        Commands::View {
            stores,
            store,
            top,
            strategy,
            symbol,
        } => {
            stores.apply(&mut config);
            config.validate()?;
            run_view(&config, store, top, strategy.as_deref(), symbol.as_deref())
        }
        Commands::Status { stores } => {
            stores.apply(&mut config);
            config.validate()?;
            run_status(&config)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

impl StoreArgs {
    fn apply(self, config: &mut ReconcileConfig) {
        if let Some(path) = self.log_store {
            config.stores.log_path = path;
        }
        if let Some(path) = self.relational_store {
            config.stores.relational_path = path;
        }
        if let Some(table) = self.table {
            config.stores.table = table;
        }
    }
}

impl ReconcileArgs {
    fn apply(self, config: &mut ReconcileConfig) {
        self.stores.apply(config);
        if let Some(path) = self.artifact {
            config.output.artifact = path;
        }
        if self.audit_report.is_some() {
            config.output.audit_report = self.audit_report;
        }
        if self.audit_csv.is_some() {
            config.output.audit_csv = self.audit_csv;
        }
        if let Some(tolerance) = self.tolerance {
            config.reconcile.tolerance = tolerance;
        }
        if self.relative {
            config.reconcile.tolerance_mode = ToleranceMode::Relative;
        }
        if let Some(store) = self.authoritative {
            config.reconcile.authoritative = store;
        }
    }
}

// ─── Commands ────────────────────────────────────────────────────────

fn run_reconcile(config: &ReconcileConfig) -> Result<()> {
    let summary = run(config)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Groups:            {}", summary.groups);
    for classification in Classification::ALL {
        println!(
            "  {:<16} {}",
            format!("{classification}:"),
            summary.count(classification)
        );
    }
    println!("Skipped records:   {}", summary.skipped_records);
    for store in &summary.unavailable {
        println!("Unavailable store: {store}");
    }
    let state = if summary.artifact.unchanged { "unchanged" } else { "written" };
    println!(
        "Artifact {state}: {} (blake3 {})",
        summary.artifact.path.display(),
        &summary.artifact.digest[..16]
    );
    if let Some(path) = &summary.audit_report {
        println!("Audit report:      {}", path.display());
    }
    if let Some(path) = &summary.audit_csv {
        println!("Audit CSV:         {}", path.display());
    }
}

fn run_compare(config: &ReconcileConfig) -> Result<()> {
    let loaded = load_stores(&config.stores);
    let rec = reconcile(
        &loaded,
        config.reconcile.tolerance(),
        config.reconcile.authoritative,
    );
    print!("{}", render_markdown(&loaded, &rec));
    Ok(())
}

fn run_view(
    config: &ReconcileConfig,
    store: StoreKind,
    top: usize,
    strategy: Option<&str>,
    symbol: Option<&str>,
) -> Result<()> {
    let loaded = match store {
        StoreKind::Log => LoadedStore::load(&config.stores.log_store()),
        StoreKind::Relational => LoadedStore::load(&config.stores.relational_store()),
    };
    let report = loaded.load.context("store unavailable")?;

    let matches = |key: &GroupKey| {
        strategy.map_or(true, |s| key.strategy_type == s) && symbol.map_or(true, |s| key.symbol == s)
    };
    let ranked = rank_groups(&report.records, top);

    println!(
        "{} trials in the {store} store ({} skipped)",
        report.len(),
        report.corrupt.len()
    );
    for (key, trials) in ranked.iter().filter(|(key, _)| matches(*key)) {
        println!("\n{key}");
        println!(
            "  {:<4} {:<20} {:>10} {:>8} {:>8} {:>9} {:>7}  {}",
            "#", "test_id", "return %", "sharpe", "win %", "max dd %", "trades", "params"
        );
        for (rank, trial) in trials.iter().enumerate() {
            print_trial(rank + 1, trial);
        }
    }
    Ok(())
}

fn print_trial(rank: usize, trial: &TrialRecord) {
    let m = &trial.metrics;
    println!(
        "  {:<4} {:<20} {:>10.2} {:>8.2} {:>8.1} {:>9.2} {:>7}  {}",
        rank,
        trial.test_id,
        m.total_return,
        m.sharpe_ratio,
        m.win_rate,
        m.max_drawdown,
        m.total_trades,
        trial.params.to_json_text()
    );
}

fn run_status(config: &ReconcileConfig) -> Result<()> {
    let loaded = load_stores(&config.stores);
    for store in StoreKind::ALL {
        print_status(&loaded.get(store).status);
    }
    match freshness(&loaded.log.status, &loaded.relational.status) {
        Freshness::Even => println!("\nBoth stores end with the same trial."),
        Freshness::Ahead(store) => println!("\nThe {store} store holds the most recent trial."),
        Freshness::Unknown => println!("\nFreshness unknown (a store has no readable timestamps)."),
    }
    Ok(())
}

fn print_status(status: &StoreStatus) {
    println!("{} store: {}", status.store, status.location);
    if let Some(reason) = &status.unavailable {
        println!("  unavailable: {reason}");
        return;
    }
    if let Some(modified) = status.modified {
        println!("  modified:     {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  records:      {}", status.records);
    println!("  skipped:      {}", status.skipped);
    println!("  warnings:     {}", status.warnings);
    println!(
        "  latest trial: {}",
        status.latest_trial.as_deref().unwrap_or("n/a")
    );
}

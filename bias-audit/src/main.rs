//! bias-audit - command-line front end for the audit wizard
//!
//! `run` drives all six stages from a plan file and prints the report.
//! `results` and `download` work on a completed audit handle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bias_audit::models::SessionHandle;
use bias_audit::results::export::{save_csv, to_csv_bytes};
use bias_audit::results::{AuditReport, Kde, ProjectedTable, TableSelection};
use bias_audit::{HttpBackend, ResultsService, WizardEvent, WizardPlan, WorkflowController, WorkflowSettings};
use bias_audit_common::config::{CliOverrides, ConfigResolver, TomlConfig};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for bias-audit
#[derive(Parser, Debug)]
#[command(name = "bias-audit")]
#[command(about = "Bias audit wizard for automated grading models")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Scoring backend base URL
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every wizard stage from a plan file
    Run {
        /// TOML plan answering each stage
        #[arg(short, long)]
        plan: PathBuf,

        /// Also write the projected measurement table here
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Fetch and print the results of a completed audit
    Results {
        #[arg(long)]
        handle: String,
    },
    /// Download the backend's CSV for a completed audit
    Download {
        #[arg(long)]
        handle: String,

        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = ConfigResolver::new(CliOverrides {
        config_path: args.config.clone(),
        backend_url: args.backend_url.clone(),
        log_level: args.log_level.clone(),
    });
    let config = resolver.resolve().context("Failed to resolve configuration")?;

    init_tracing(&config)?;

    info!("bias-audit {}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", config.backend_url);

    let backend = Arc::new(HttpBackend::from_config(&config).context("Failed to build backend client")?);

    match args.command {
        Command::Run { plan, export } => run_plan(backend, &config, plan, export).await,
        Command::Results { handle } => {
            let service = ResultsService::new(backend);
            let results = service.fetch_results(&SessionHandle::new(handle)).await?;
            let selection = TableSelection::from_results(&results);
            let report = AuditReport::build(&results, selection, &kde(&config)?);
            print_report(&report);
            Ok(())
        }
        Command::Download { handle, out } => {
            let service = ResultsService::new(backend);
            let bytes = service.download_results_csv(&SessionHandle::new(handle)).await?;
            std::fs::write(&out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
            info!("Saved results to {}", out.display());
            Ok(())
        }
    }
}

/// Log to stderr, or append to the configured log file
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let writer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bias_audit={0},bias_audit_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();
    Ok(())
}

async fn run_plan(
    backend: Arc<HttpBackend>,
    config: &TomlConfig,
    plan_path: PathBuf,
    export: Option<PathBuf>,
) -> Result<()> {
    let plan = WizardPlan::load(&plan_path)?;
    let controller = WorkflowController::new(backend, WorkflowSettings::from_config(config));

    let mut events = controller.subscribe();
    let logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                WizardEvent::StageEntered { stage, .. } => info!("Entered {}", stage),
                WizardEvent::StageRejected { stage, error, .. } => warn!("{} rejected: {}", stage, error),
                WizardEvent::StaleResultDiscarded { call, .. } => warn!("Discarded stale {} result", call),
                other => tracing::debug!(event = other.event_type(), "Wizard event"),
            }
        }
    });

    let outcome = plan.execute(&controller).await;

    let snapshot = controller.snapshot();
    if !snapshot.validation.samples.is_empty() {
        info!("Reviewed {} sampled rows", snapshot.validation.samples.len());
    }
    drop(controller);
    logger.abort();

    let results = outcome?;
    let selection = TableSelection::from_measures(&snapshot.measures);
    let report = AuditReport::build(&results, selection, &kde(config)?);
    print_report(&report);

    if let Some(path) = export {
        save_csv(&report.measurements, &path)?;
    }
    Ok(())
}

fn kde(config: &TomlConfig) -> Result<Kde> {
    Ok(Kde::new(config.kde_bandwidth)?)
}

fn print_report(report: &AuditReport) {
    println!("Audit {}", report.audit_handle);
    println!(
        "  variations: {}  average change: {:.3}  max bias_1: {:.3}  groups: {}",
        report.summary.total_variations,
        report.summary.average_grade_change,
        report.summary.max_bias_measure,
        report.summary.groups_analyzed
    );

    println!("\nMeasurements");
    print_table(&report.measurements);
    println!("\nMoments");
    print_table(&report.moments);

    println!("\nPrimary bias distributions");
    for (variation, curve) in &report.distributions {
        let peak = curve
            .iter()
            .copied()
            .fold((0.0_f64, 0.0_f64), |best, point| if point.1 > best.1 { point } else { best });
        println!("  {:<16} peak density {:.3} at {:+.3}", variation, peak.1, peak.0);
    }
}

fn print_table(table: &ProjectedTable) {
    match to_csv_bytes(table) {
        Ok(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
        Err(e) => warn!("Could not render table: {}", e),
    }
}

//! mssql-warehouse-migrate CLI - MSSQL to warehouse migration.

use clap::{Parser, Subcommand};
use mssql_warehouse_migrate::report::{self, MigrationReport, TableStatus};
use mssql_warehouse_migrate::{Config, MigrateError, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Interval between progress log lines during `run`.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "mssql-warehouse-migrate")]
#[command(about = "Migrate MSSQL tables into a PostgreSQL-wire warehouse")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Write the JSON report to this file
    #[arg(long)]
    report_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate tables: translate schema, transfer rows, reconcile
    Run {
        /// Only migrate this table (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Override number of tables migrated concurrently
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Translate and create target tables without moving data
    Translate {
        /// Only translate this table (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Compare null and distinct counts between source and target
    Reconcile {
        /// Only reconcile this table (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    if let Commands::Run {
        workers: Some(w), ..
    } = &cli.command
    {
        config.migration.table_concurrency = Some(*w);
        config.validate()?;
    }

    // Fill unset pool and pipeline sizes from the host's resources
    let config = config.with_auto_tuning();

    let cancel_token = setup_signal_handler().await?;

    match &cli.command {
        Commands::Run { tables, .. } => {
            let tables = config.select_tables(tables)?;
            let orchestrator = Orchestrator::new(config).await?;

            let progress = orchestrator.progress();
            let ticker = tokio::spawn(async move {
                let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!("Progress: {} rows written", progress.load(Ordering::Relaxed));
                }
            });
            let result = orchestrator.run(&tables, &cancel_token).await;
            ticker.abort();
            let run_report = result?;

            if let Some(path) = &cli.report_file {
                report::write_json(path, &run_report)?;
            }
            if cli.output_json {
                println!("{}", run_report.to_json()?);
            } else {
                print_summary(&run_report);
            }
            Ok(run_report.exit_code())
        }

        Commands::Translate { tables } => {
            let tables = config.select_tables(tables)?;
            let orchestrator = Orchestrator::new(config).await?;

            let mut committed = Vec::with_capacity(tables.len());
            for table in &tables {
                if cancel_token.is_cancelled() {
                    return Err(MigrateError::Cancelled);
                }
                let schema = orchestrator.translate_only(table, &cancel_token).await?;
                if !cli.output_json {
                    println!(
                        "-- {} ({} attempt(s))\n{};\n",
                        table.target,
                        schema.attempts.len(),
                        schema.ddl
                    );
                }
                committed.push(schema);
            }

            if let Some(path) = &cli.report_file {
                report::write_json(path, &committed)?;
            }
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&committed)?);
            }
            Ok(0)
        }

        Commands::Reconcile { tables } => {
            let tables = config.select_tables(tables)?;
            let orchestrator = Orchestrator::new(config).await?;

            let results = orchestrator.reconcile_tables(&tables, &cancel_token).await;

            // Tables that could not be compared are reported; the first
            // failure decides the exit code once every table has run.
            let mut reports = Vec::with_capacity(tables.len());
            let mut first_error = None;
            for (table, result) in tables.iter().zip(results) {
                let result = match result {
                    Ok(result) => result,
                    Err(MigrateError::ColumnMismatch { table: name, report }) => {
                        let partial = report.as_ref().clone();
                        first_error
                            .get_or_insert(MigrateError::ColumnMismatch { table: name, report });
                        partial
                    }
                    Err(e) => {
                        if !cli.output_json {
                            println!("  FAILED {}: {}", table.target, e);
                        }
                        first_error.get_or_insert(e);
                        continue;
                    }
                };
                if !cli.output_json {
                    let status = if result.is_match() { "MATCH" } else { "MISMATCH" };
                    println!(
                        "  {} {} (rows: {} / {})",
                        status, result.table, result.source_row_count, result.target_row_count
                    );
                    for column in result.mismatched_columns() {
                        println!("      column differs: {}", column);
                    }
                    for column in result.existence_mismatches.keys() {
                        println!("      column on one side only: {}", column);
                    }
                }
                reports.push(result);
            }

            if let Some(path) = &cli.report_file {
                report::write_json(path, &reports)?;
            }
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            if reports.iter().any(|r| !r.is_match()) {
                warn!("Reconciliation found discrepancies");
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(0),
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MSSQL): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (warehouse): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::pool("Health check failed", "health-check"));
            }
            Ok(0)
        }
    }
}

fn print_summary(report: &MigrationReport) {
    println!("\nMigration finished: {:?}", report.status);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Rows: {}", report.rows_transferred);
    for table in &report.tables {
        let detail = match (&table.status, &table.error) {
            (TableStatus::Failed, Some(err)) => format!("failed at {}: {}", err.stage, err.message),
            (TableStatus::Mismatch, _) => "reconciliation mismatch".to_string(),
            (status, _) => format!("{:?}", status).to_lowercase(),
        };
        println!(
            "  {} -> {}: {} ({} rows)",
            table.source,
            table.target,
            detail,
            table.rows_transferred
        );
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("invalid --log-format '{}': expected text or json", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Cancelling in-flight tables...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Cancelling in-flight tables...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}

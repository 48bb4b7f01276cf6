//! CLI command definitions and handlers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use db_custom_metrics::{
    scheduler, EventsApiClient, Publisher, SqliteSource, SyncConfig, SyncMode, SyncOrchestrator,
};

#[derive(Parser)]
#[command(name = "db-custom-metrics")]
#[command(author, version, about = "Sync database rows into an events analytics store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: ./config.toml, then ~/.config/db-custom-metrics/config.toml)
    #[arg(short, long, global = true, env = "DB_CUSTOM_METRICS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log what would be published instead of sending it
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Clone, Copy)]
pub enum Commands {
    /// Run a sync cycle on every scheduled tick (default)
    Run,

    /// Run a single sync cycle now and exit
    Once,

    /// Validate the configuration and show the selected mode
    Check,
}

type Orchestrator = SyncOrchestrator<SqliteSource, EventsApiClient>;

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    let path = SyncConfig::resolve_path(path.map(PathBuf::as_path));
    info!("Loading configuration from {}", path.display());
    SyncConfig::load(&path).with_context(|| format!("Invalid configuration in {}", path.display()))
}

fn build_orchestrator(config: &SyncConfig, dry_run: bool) -> Result<Orchestrator> {
    let source = SqliteSource::new(&config.database.path).with_busy_timeout(config.database.timeout());
    let store = EventsApiClient::new(&config.events_api).context("Failed to create events API client")?;
    let publisher = Publisher::new(config.app.batch_size).dry_run(dry_run);

    Ok(SyncOrchestrator::new(config, source, store).with_publisher(publisher))
}

/// Schedule cycles until interrupted
pub fn run_scheduled(config_path: Option<&PathBuf>, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config, dry_run)?;
    info!("Sync mode: {}", orchestrator.mode());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start scheduler runtime")?;

    let job = Arc::new(move || orchestrator.tick());
    runtime.block_on(scheduler::run(config.schedule.clone(), Arc::clone(&job)));
    drop(runtime);

    Ok(())
}

/// Run exactly one cycle
pub fn run_once(config_path: Option<&PathBuf>, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config, dry_run)?;

    let report = orchestrator.run_cycle().context("Sync cycle failed")?;

    println!("Mode:            {}", report.mode);
    if let Some(entries) = report.index_entries {
        println!("Indexed entries: {}", entries);
    }
    println!("Rows read:       {}", report.rows_read);
    println!("Already present: {}", report.rows_skipped);
    println!("Published:       {}", report.publish.records_published);
    println!("Failed batches:  {}", report.publish.failed_batches);
    println!("Duration:        {:?}", report.duration);

    Ok(())
}

/// Validate configuration without touching the database or API
pub fn check(config_path: Option<&PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let mode = SyncMode::detect(&config.database.query, config.app.timerange_historial_data_in_min);

    println!("Configuration OK");
    println!("  Mode:     {}", mode);
    println!("  Lookback: {} min", mode.lookback_minutes());
    println!("  Database: {}", config.database.path.display());
    println!("  Schema:   {}", config.events_api.schema);
    println!("  Batch:    {} records", config.app.batch_size);
    println!(
        "  Schedule: every {}s at offset {}s",
        config.schedule.interval_secs, config.schedule.at_second
    );
    if config.app.filters.is_empty() {
        println!("  Filters:  none (no deduplication key)");
    }
    for filter in &config.app.filters {
        println!("  Filter:   {} = {}", filter.name, filter.values.join(", "));
    }

    Ok(())
}

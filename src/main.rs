mod cli;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use pipeport::config::PipeportConfig;
use pipeport::orchestrator::MigrateEngine;
use pipeport::source::{Catalog, CatalogConnector, SourceConnector};
use pipeport::target::{DirectoryTarget, MemoryTarget, TargetRuntime};
use pipeport::translate::TranslatorRegistry;
use ui::MigrationProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = PipeportConfig::load(cli.config.as_deref())?;
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(catalog) = cli.catalog {
        config.source.catalog = Some(catalog);
    }

    match cli.command {
        Command::Search { query } => search(&config, &query),
        Command::Migrate { ids, out, dry_run } => {
            let failed = migrate(&config, &ids, out, dry_run).await?;
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Status => {
            status(&config);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pipeport=debug" } else { "pipeport=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connector(config: &PipeportConfig) -> Result<CatalogConnector> {
    let path = config
        .source
        .catalog
        .as_deref()
        .context("no source catalog configured; set [source].catalog or pass --catalog")?;
    let catalog =
        Catalog::load(path).with_context(|| format!("loading catalog {}", path.display()))?;
    Ok(CatalogConnector::new(catalog))
}

fn search(config: &PipeportConfig, query: &str) -> Result<()> {
    let source = connector(config)?.connect(&config.source.instance())?;
    ui::print_search(&source.search(query)?);
    Ok(())
}

/// Run a migration batch. Returns whether any job ended in error.
async fn migrate(config: &PipeportConfig, ids: &[String], out: PathBuf, dry_run: bool) -> Result<bool> {
    let connector = Arc::new(connector(config)?);
    let memory = Arc::new(MemoryTarget::new());
    let target: Arc<dyn TargetRuntime> = if dry_run {
        Arc::clone(&memory) as Arc<dyn TargetRuntime>
    } else {
        Arc::new(DirectoryTarget::new(&out)?)
    };

    let engine = MigrateEngine::start(
        config.engine_settings(),
        connector,
        target,
        TranslatorRegistry::with_defaults(),
    )?;
    engine.submit(&config.source.instance(), ids, config.threads);

    let progress = MigrationProgress::start(ids.len());
    while !engine.all_closed() {
        progress.update(&engine.list_jobs());
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    // Shutdown drops the engine's tracking, so read the final table first.
    let summaries = engine.list_jobs();
    engine.shutdown().await;
    progress.finish();
    progress.print_table(&summaries);

    if dry_run {
        for name in memory.names() {
            if let Some(job) = memory.job(&name) {
                progress.print_script(&name, &job.script);
            }
        }
    } else {
        println!("\n  Jobs written to {}", out.display());
    }

    Ok(summaries.iter().any(|s| s.is_error()))
}

fn status(config: &PipeportConfig) {
    println!("pipeport v{}", env!("CARGO_PKG_VERSION"));
    println!("  Source:        {}", config.source.instance());
    match &config.source.catalog {
        Some(path) => println!("  Catalog:       {}", path.display()),
        None => println!("  Catalog:       (not configured)"),
    }
    println!("  Threads:       {}", config.threads);
    println!("  Poll interval: {}ms", config.poll_interval_ms);
    println!("  Job prefix:    {}", config.job_prefix);
    println!("  Node param:    {}", config.node_parameter);
    println!("  Sandbox:       {}", config.sandbox);
    let kinds: Vec<_> = TranslatorRegistry::with_defaults().kinds().map(str::to_string).collect();
    println!("  Step kinds:    {}", kinds.join(", "));
}

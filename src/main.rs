use clap::Parser;
use std::sync::Arc;
use steward::adapters::{HttpResultsClient, SqliteStore};
use steward::bus::Bus;
use steward::cli::{self, Cli, Commands};
use steward::config::AppConfig;
use steward::error::{Result, StewardError};
use steward::services::{evaluate_pending, ResultChecker, ResultCheckerConfig};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::EvaluatePending { db, dry_run }) => {
            init_logging_simple();
            run_evaluate_pending(&cli.config, db, *dry_run).await?;
        }
        Some(Commands::Stats { db, agent, limit }) => {
            init_logging_simple();
            run_stats(db, agent.as_deref(), *limit).await?;
        }
        Some(Commands::RecomputeStats { db }) => {
            init_logging_simple();
            run_recompute_stats(db).await?;
        }
        Some(Commands::Run) | None => {
            run_service(&cli.config).await?;
        }
    }

    Ok(())
}

/// Long-running mode: recover scheduled checks, then poll for race results
/// until the process is told to stop.
async fn run_service(config_dir: &str) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;
    init_logging(&config.logging.level, config.logging.json);

    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!("Invalid configuration: {}", problem);
        }
        return Err(StewardError::Internal(format!(
            "configuration rejected with {} problem(s)",
            problems.len()
        )));
    }

    info!("Starting steward settlement service");

    let store = SqliteStore::new(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;
    info!("Database connected: {}", config.database.url);

    let fetcher =
        HttpResultsClient::new(&config.results.api_url, config.results.fetch_timeout_secs)?;
    info!("Results collector: {}", fetcher.base_url());

    let bus = Bus::default();
    let checker = ResultChecker::new(
        Arc::new(fetcher),
        Arc::new(store.clone()),
        bus.clone(),
        ResultCheckerConfig::from(&config.results),
    );

    let restored = checker.recover().await?;
    if restored > 0 {
        info!("Recovered {} in-flight result checks", restored);
    }

    checker.start().await;

    // Announce settled races as they land on the bus.
    let mut evaluated = bus.subscribe_evaluated();
    let announce_handle = tokio::spawn(async move {
        loop {
            match evaluated.recv().await {
                Ok(event) => {
                    info!(
                        "Race {} settled: {} prediction(s) evaluated",
                        event.race_id,
                        event.predictions.len()
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Evaluation announcements lagged {} messages", n);
                }
                Err(_) => break,
            }
        }
    });

    info!("Service is running. Press Ctrl+C to stop.");
    shutdown_signal().await;

    info!("Shutting down...");
    checker.stop();
    announce_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// One-shot mode: settle every stored prediction whose race result is
/// already available, then print a summary and exit.
async fn run_evaluate_pending(config_dir: &str, db: &str, dry_run: bool) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;

    let store = SqliteStore::new(&db_url(db), 5).await?;
    store.migrate().await?;

    let fetcher =
        HttpResultsClient::new(&config.results.api_url, config.results.fetch_timeout_secs)?;

    println!("Evaluating pending predictions against {}", fetcher.base_url());
    if dry_run {
        println!("Dry run: outcomes will not be written.");
    }
    println!();

    let report = evaluate_pending(&store, &fetcher, dry_run).await?;

    println!("  Races scanned:         {}", report.races_scanned);
    println!("  Races settled:         {}", report.races_settled);
    println!("  Races without result:  {}", report.races_unavailable);
    if report.fetch_failures > 0 {
        println!("  Fetch failures:        {}", report.fetch_failures);
    }
    if dry_run {
        println!("  Predictions to settle: {}", report.predictions_would_settle);
    } else {
        println!("  Predictions settled:   {}", report.predictions_settled);
        println!("  Already settled:       {}", report.predictions_already_settled);
        if report.predictions_failed > 0 {
            println!("  Failed:                {}", report.predictions_failed);
        }
    }
    println!();

    Ok(())
}

async fn run_stats(db: &str, agent: Option<&str>, limit: i64) -> Result<()> {
    let store = SqliteStore::new(&db_url(db), 5).await?;
    store.migrate().await?;

    match agent {
        Some(name) => match store.get_agent_statistics(name).await? {
            Some(stats) => {
                println!();
                cli::print_agent_statistics(&stats);
            }
            None => println!("  No statistics recorded for agent '{}'", name),
        },
        None => {
            let rows = store.top_agents(limit).await?;
            println!();
            cli::print_leaderboard(&rows);
        }
    }

    Ok(())
}

async fn run_recompute_stats(db: &str) -> Result<()> {
    let store = SqliteStore::new(&db_url(db), 5).await?;
    store.migrate().await?;

    let agents = store.recompute_statistics().await?;
    println!("Rebuilt statistics for {} agent(s) from stored outcomes.", agents);

    Ok(())
}

fn db_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite://{}", path)
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},steward=debug,sqlx=warn", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

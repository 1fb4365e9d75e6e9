//! Main entry point for the cuebot queue service
//!
//! Loads configuration, initializes logging, starts the reconciliation
//! scheduler and HTTP server, and shuts everything down on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use cuebot::config::{validate_config, AppConfig};
use cuebot::service::{AppState, HealthCheck, HealthStatus, ServiceContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Cuebot - voice-channel queue tracker
#[derive(Parser)]
#[command(
    name = "cuebot",
    version,
    about = "Tracks who is waiting in a voice channel queue and for how long",
    long_about = "Cuebot watches a queue voice channel per server during the configured regional \
                 sessions, keeps members' places through short absences, records how often and \
                 how long each member queued, and keeps a live status message up to date."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override HTTP server port")]
    http_port: Option<u16>,

    /// Reconciliation interval override
    #[arg(long, value_name = "SECONDS", help = "Override seconds between reconciliation ticks")]
    refresh_seconds: Option<u64>,

    /// Storage file override
    #[arg(long, value_name = "FILE", help = "Persist records to this JSON file")]
    storage: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Plan passes without writing
    #[arg(
        long,
        help = "Run passes without posting status messages or committing queue changes"
    )]
    dry_run: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit without starting service")]
    check_config: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = AppState::new(config).await?;
    let context = app_state.context();

    match HealthCheck::check(&context).await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                println!("  {}: {}", check.name, check.status);
            }
            println!("  Servers: {}", health.stats.servers);
            println!("  Configured servers: {}", health.stats.configured_servers);
            println!("  Uptime: {}", health.stats.uptime_info);

            // The service is not started here, so only storage decides
            let storage_ok = health
                .checks
                .iter()
                .filter(|check| check.name == "repository")
                .all(|check| check.status == HealthStatus::Healthy);
            std::process::exit(if storage_ok { 0 } else { 1 });
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log a periodic health summary
async fn health_check_task(context: Arc<ServiceContext>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));

    while context.is_running().await {
        interval.tick().await;

        match HealthCheck::check(&context).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} servers, {} queued, {} on timeout",
                    health.status, health.stats.servers, health.stats.queued, health.stats.on_timeout
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Cuebot Queue Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   HTTP port: {}", config.service.http_port);
    info!("   Refresh: {}s", config.scheduler.refresh_seconds);
    info!(
        "   US session: {} - {}",
        config.sessions.us.start, config.sessions.us.end
    );
    info!(
        "   EU session: {} - {}",
        config.sessions.eu.start, config.sessions.eu.end
    );
    info!(
        "   Storage: {}",
        config
            .storage
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".to_string())
    );
    if config.scheduler.dry_run {
        info!("   Dry run: enabled");
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(refresh_seconds) = args.refresh_seconds {
        config.scheduler.refresh_seconds = refresh_seconds;
    }

    if let Some(storage) = &args.storage {
        config.storage.path = Some(storage.clone());
    }

    if args.dry_run {
        config.scheduler.dry_run = true;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Some(config_path) = &args.config {
        info!("Loaded configuration from: {}", config_path.display());
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.check_config {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.context()));

    info!("✅ Cuebot is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    if let Err(e) = app_state.shutdown().await {
        warn!("⚠️  Shutdown did not complete cleanly: {}", e);
    }

    info!("🛑 Cuebot stopped");
    Ok(())
}

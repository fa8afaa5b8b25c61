//! CLI entrypoint for toolbridge
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod commands;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use commands::{Cli, Command};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use toolbridge_application::{
    AdaptiveRouter, AuditLogger, CallToolUseCase, DisabledMessageBus, MessageBusPort,
    NoAuditLogger,
};
use toolbridge_infrastructure::bus::BusStore;
use toolbridge_infrastructure::daemon::{HealthStatus, classify_health};
use toolbridge_infrastructure::{
    BuiltinToolCatalog, ConfigLoader, Daemon, FileBusStore, FileConfig, GatewayClient,
    JsonlAuditLogger, MemoryBusStore, MessageBusClient, TokenManager, register_providers,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_deref())
            .map_err(|e| anyhow!("Failed to load configuration: {}", e))?
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(cli.verbose, &config);

    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Daemon { host, port, token } => {
            let mut config = config;
            if let Some(host) = host {
                config.daemon.host = host;
            }
            if let Some(port) = port {
                config.daemon.port = port;
            }
            if let Some(token) = token {
                config.daemon.auth_token = token;
            }
            run_daemon(config).await
        }
        Command::Tools => {
            let client = gateway(&config).await?;
            for tool in client.list_tools().await? {
                println!("{:<12} {}", tool.name, tool.description);
            }
            client.close().await;
            Ok(())
        }
        Command::Call { name, args, quiet } => {
            let arguments: Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object");
            }
            let client = gateway(&config).await?;
            let result = client
                .call_tool_with_progress(&name, arguments, |note| {
                    if !quiet {
                        eprintln!("... {}", note);
                    }
                })
                .await?;
            client.close().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.is_error() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::RotateToken { old, new } => {
            let client = gateway(&config).await?;
            client.rotate_token(&old, &new).await?;
            client.close().await;
            println!("Token rotated. Update daemon.auth_token before the next restart.");
            Ok(())
        }
        Command::Health => show_health(&config).await,
        Command::ShowConfig => {
            println!("Configuration sources:");
            for line in ConfigLoader::describe_sources(cli.config.as_deref()) {
                println!("  {}", line);
            }
            println!();
            let mut effective = config.clone();
            if !effective.daemon.auth_token.is_empty() {
                effective.daemon.auth_token = "<redacted>".to_string();
            }
            println!("{}", toml::to_string_pretty(&effective)?);
            Ok(())
        }
    }
}

/// stderr at the verbosity level (`RUST_LOG` when no `-v` is given), plus a
/// daily-rolling file when `logging.dir` is configured.
fn init_logging(verbose: u8, config: &FileConfig) -> Option<WorkerGuard> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match config.logging.dir_path() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "toolbridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    guard
}

async fn message_bus(config: &FileConfig) -> Result<Arc<dyn MessageBusPort>> {
    let bus_config = &config.message_bus;
    if !bus_config.enabled {
        info!("Message bus disabled, all results stay inline");
        return Ok(Arc::new(DisabledMessageBus));
    }
    let settings = bus_config.to_settings()?;
    let store: Arc<dyn BusStore> = match bus_config.dir_path() {
        Some(dir) => Arc::new(
            FileBusStore::open(&dir)
                .await
                .with_context(|| format!("Failed to open message bus at {}", dir.display()))?,
        ),
        None => {
            warn!("message_bus.dir is unset; offloaded results are only readable in-process");
            Arc::new(MemoryBusStore::new())
        }
    };
    Ok(Arc::new(MessageBusClient::new(settings, store)))
}

async fn run_daemon(config: FileConfig) -> Result<()> {
    let audit: Arc<dyn AuditLogger> = match config.logging.audit_path() {
        Some(path) => match JsonlAuditLogger::new(&path) {
            Some(logger) => {
                info!("Audit log: {}", path.display());
                Arc::new(logger)
            }
            None => Arc::new(NoAuditLogger),
        },
        None => Arc::new(NoAuditLogger),
    };
    let tokens = Arc::new(TokenManager::with_audit(
        config.daemon.auth_token.clone(),
        audit,
    ));

    // === Dependency Injection ===
    let router = Arc::new(AdaptiveRouter::new(config.router.to_params()?));
    if register_providers(&router, &config.providers) == 0 {
        bail!("No usable providers configured");
    }
    let healthy = router
        .health_check_all()
        .await
        .into_iter()
        .filter(|(_, ok)| *ok)
        .count();
    info!("{} of {} provider(s) healthy", healthy, config.providers.len());
    let bus = message_bus(&config).await?;
    let dispatch = CallToolUseCase::new(Arc::new(BuiltinToolCatalog::new()), router, bus)
        .with_retry(config.retry_policy());

    let daemon = Daemon::new(config.daemon.to_settings(), tokens, dispatch);
    let listener = Daemon::bind(config.daemon.endpoint()).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
            }
            shutdown.cancel();
        }
    });

    daemon.serve(listener, shutdown).await?;
    Ok(())
}

async fn gateway(config: &FileConfig) -> Result<GatewayClient> {
    let settings = config.gateway.to_settings(&config.daemon);
    let client = GatewayClient::new(settings).with_message_bus(message_bus(config).await?);
    client.connect().await?;
    Ok(client)
}

async fn show_health(config: &FileConfig) -> Result<()> {
    let Some(path) = config.daemon.health_path() else {
        bail!("daemon.health_file is not configured");
    };
    let max_age = std::time::Duration::from_secs(config.gateway.health_max_age_secs);
    let status = classify_health(&path, max_age).await;
    match &status {
        HealthStatus::Fresh(record) => println!(
            "{}: pid {}, {} session(s), updated {:.1}s ago",
            status.as_str(),
            record.pid,
            record.sessions,
            record.age().as_secs_f64()
        ),
        HealthStatus::Stale { record, age } => println!(
            "{}: pid {} last wrote {}s ago; the daemon is probably dead",
            status.as_str(),
            record.pid,
            age.as_secs()
        ),
        HealthStatus::Missing => println!("{}: no health file at {}", status.as_str(), path.display()),
    }
    if matches!(status, HealthStatus::Fresh(_)) {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

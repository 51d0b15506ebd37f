use sitewatch::alerting::AlertDispatcher;
use sitewatch::db::memory::{MemoryMeasurementStore, MemoryNotificationRegistry, system_clock};
use sitewatch::db::services::{PgMeasurementStore, PgNotificationRegistry};
use sitewatch::db::{self, MeasurementStore, NotificationRegistry};
use sitewatch::notifications::senders::vk::VkBotSender;
use sitewatch::probe::{HttpLoadProbe, ProbeRunner};
use sitewatch::server::config::ServerConfig;
use sitewatch::server::connections::ConnectionRegistry;
use sitewatch::server::scheduler::Scheduler;
use sitewatch::services::VkSignVerifier;
use sitewatch::version::VERSION;
use sitewatch::web::session::GatewayContext;
use sitewatch::web::{AppState, create_axum_router};

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Keep samples and alerts in memory instead of Postgres
    #[arg(long)]
    ephemeral: bool,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "sitewatch.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("sitewatch version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    // --- Config Setup ---
    let config = match ServerConfig::load(args.config.as_deref(), args.ephemeral) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting sitewatch, version: {}", VERSION);

    let display_offset = config.display_offset()?;

    // --- Store Setup ---
    let mut db_pool = None;
    let (measurements, registry): (Arc<dyn MeasurementStore>, Arc<dyn NotificationRegistry>) =
        match config.database_url.as_deref() {
            Some(database_url) if !args.ephemeral => {
                let pool = db::create_pool(database_url, config.db_max_connections).await?;
                info!("Connected to database.");
                db_pool = Some(pool.clone());
                (
                    Arc::new(PgMeasurementStore::new(pool.clone(), display_offset)) as Arc<dyn MeasurementStore>,
                    Arc::new(PgNotificationRegistry::new(pool)) as Arc<dyn NotificationRegistry>,
                )
            }
            _ => {
                warn!("Running with in-memory stores, nothing survives a restart.");
                (
                    Arc::new(MemoryMeasurementStore::new(system_clock(), display_offset)) as Arc<dyn MeasurementStore>,
                    Arc::new(MemoryNotificationRegistry::new(system_clock())) as Arc<dyn NotificationRegistry>,
                )
            }
        };

    // --- Collaborators ---
    let probe = Arc::new(HttpLoadProbe::new()?);
    let bot_sender = Arc::new(VkBotSender::new(
        config.vk_bot_token.clone(),
        config.vk_api_base.clone(),
        config.vk_api_version.clone(),
    )?);
    let connections = Arc::new(ConnectionRegistry::new());

    // --- Scheduler Task ---
    let runner = ProbeRunner::new(
        probe,
        measurements.clone(),
        config.target_url.clone(),
        config.probe_max_requests,
        config.probe_max_seconds,
    );
    let dispatcher = AlertDispatcher::new(
        registry.clone(),
        bot_sender,
        config.notification_text.clone(),
        config.delivery_min_wait(),
    );
    let scheduler = Arc::new(Scheduler::new(
        runner,
        measurements.clone(),
        connections.clone(),
        dispatcher,
        config.recent_window,
        config.fast_threshold_seconds,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let scheduler_task = tokio::spawn(scheduler.start(config.check_interval(), shutdown_rx));

    // --- Axum HTTP Server Setup ---
    let app_state = Arc::new(AppState {
        gateway: Arc::new(GatewayContext {
            measurements,
            registry,
            verifier: Arc::new(VkSignVerifier),
            auth_secret: config.vk_secure_key.clone(),
            recent_window: config.recent_window,
            delivery_window: config.delivery_window(),
            display_offset,
        }),
        connections,
    });
    let app = create_axum_router(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(address = %config.listen_addr, target = %config.target_url, "HTTP server listening");

    let serve_result = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Let the cycle in flight finish before the pool goes away.
    if shutdown_tx.send(()).is_err() {
        warn!("Check scheduler already stopped.");
    }
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Check scheduler task failed.");
    }
    if let Some(pool) = db_pool {
        pool.close().await;
        info!("Database pool closed.");
    }

    serve_result.map_err(|e| {
        error!(error = %e, "HTTP server error.");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync>
    })?;
    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for the shutdown signal.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

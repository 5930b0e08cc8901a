use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use roster_core::clock::SystemClock;
use roster_core::operator::{OperatorProfile, Permission};
use roster_db::{PgChangeFeed, PgStore};
use roster_engine::{OperatorSession, SessionConfig};
use roster_events::{DispatcherConfig, ViewNotice};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{LogFormat, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;

    // --- Tracing ---
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "roster_worker=debug,roster_engine=debug,roster_events=debug".into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!(
        operator = config.operator_id,
        category = %config.category,
        lock_ttl_secs = config.lock.ttl.as_secs(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = roster_db::create_pool(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    roster_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    roster_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Change feed ---
    let feed = Arc::new(PgChangeFeed::new(
        pool.clone(),
        config.feed_capacity,
        config.resync_backoff,
    ));
    let feed_cancel = CancellationToken::new();
    let feed_handle = {
        let feed = feed.clone();
        let cancel = feed_cancel.clone();
        tokio::spawn(async move { feed.run(cancel).await })
    };
    tracing::info!("Change feed started");

    // --- Watching session ---
    let session = OperatorSession::open(
        OperatorProfile::new(config.operator_id, Permission::Member),
        Arc::new(PgStore::new(pool)),
        feed,
        Arc::new(SystemClock),
        SessionConfig {
            lock: config.lock,
            dispatcher: DispatcherConfig {
                initial_backoff: config.resync_backoff,
                ..DispatcherConfig::default()
            },
            category: config.category,
            ..SessionConfig::default()
        },
    )?;
    let notices = session.notices();
    let log_cancel = CancellationToken::new();
    let log_handle = tokio::spawn(log_notices(notices, log_cancel.clone()));

    shutdown_signal().await;

    // --- Shutdown ---
    session.close().await;
    log_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), log_handle).await;

    feed_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), feed_handle).await;
    tracing::info!("Change feed stopped");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Log every reconciled change the session's views report.
async fn log_notices(mut rx: broadcast::Receiver<ViewNotice>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            notice = rx.recv() => match notice {
                Ok(notice) => match serde_json::to_string(&notice) {
                    Ok(json) => tracing::info!(notice = %json, "View changed"),
                    Err(e) => tracing::warn!(error = %e, "Unserializable notice"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notice log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

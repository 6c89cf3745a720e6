use std::sync::Arc;

use anyhow::Context;
use plangen_core::retry::SystemClock;
use plangen_events::{LogNotificationSink, NotificationSink, WebhookNotificationSink};
use plangen_pipeline::SubprocessPipeline;
use plangen_worker::claimer::Claimer;
use plangen_worker::config::WorkerConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "plangen_worker=info,plangen_db=info,plangen_events=info,plangen_pipeline=info".into()
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        worker_id = %config.worker_id,
        run_dir = %config.run_dir.display(),
        pipeline = %config.pipeline_command,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = plangen_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    plangen_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    plangen_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    std::fs::create_dir_all(&config.run_dir)
        .with_context(|| format!("Failed to create {}", config.run_dir.display()))?;

    // --- Collaborators ---
    let pipeline = Arc::new(SubprocessPipeline::new(
        config.pipeline_command.clone(),
        config.pipeline_args.clone(),
    ));
    let sink: Arc<dyn NotificationSink> = match &config.notify_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Webhook notifications enabled");
            Arc::new(WebhookNotificationSink::new(url.clone()).context("Failed to build webhook client")?)
        }
        None => Arc::new(LogNotificationSink),
    };

    let claimer = Claimer::new(pool.clone(), &config, pipeline, sink, Arc::new(SystemClock));

    // --- Shutdown ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    claimer.run(cancel).await;

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM. The in-flight task, if any, is finished
/// before the loop observes the cancellation.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
            tracing::info!("Received SIGINT (Ctrl-C), finishing current task");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing current task");
        }
    }
}

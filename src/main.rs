use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notify_relay::config::Settings;
use notify_relay::notification::Notifier;
use notify_relay::queue::create_queue_backend;
use notify_relay::server::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Create the queue backend selected in settings
    let queue = create_queue_backend(&settings.queue, settings.rabbitmq.as_ref()).await?;
    tracing::info!(backend = queue.backend_type(), "Queue backend ready");

    // Bind the queue to Telegram; this starts both consumers
    let notifier = match Notifier::new(&settings.telegram, queue.clone()).await {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            if let Err(close_err) = queue.close().await {
                tracing::warn!(error = %close_err, "Failed to close queue after startup error");
            }
            return Err(e.into());
        }
    };

    let shutdown = CancellationToken::new();
    let state = AppState::new(settings.clone(), notifier.clone(), shutdown.clone());

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown))
        .await?;

    // Stop consumers and release the queue
    tracing::info!("Closing notifier...");
    if let Err(e) = notifier.close().await {
        tracing::error!(error = %e, "Failed to close notifier cleanly");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal_handler(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Abort publishes still waiting on a full queue
    shutdown.cancel();
}

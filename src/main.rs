use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use pwf_room_service::config::Settings;
use pwf_room_service::gateway::RoutedDeliverySubscriber;
use pwf_room_service::redis::BackoffConfig;
use pwf_room_service::server::{create_app, AppState};
use pwf_room_service::shutdown::GracefulShutdown;
use pwf_room_service::tasks::HeartbeatTask;
use pwf_room_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    let _telemetry = init_telemetry(&settings.otel, settings.server.json_logs)?;
    tracing::info!(
        store_backend = %settings.store.backend,
        cluster_enabled = settings.cluster.enabled,
        server_id = %settings.cluster.server_id,
        "Configuration loaded"
    );

    let state = AppState::new(settings.clone())?;
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.connection_manager.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(async move {
        heartbeat_task.run().await;
    });

    // Deliveries for sockets held here, published by other instances
    let subscriber_handle = match (&state.redis_pool, settings.cluster.enabled) {
        (Some(pool), true) => {
            let subscriber = RoutedDeliverySubscriber::new(
                settings.cluster.clone(),
                pool.clone(),
                state.connection_manager.clone(),
                BackoffConfig::for_reconnect(&settings.redis),
                shutdown_tx.subscribe(),
            );
            Some(tokio::spawn(subscriber.run()))
        }
        _ => None,
    };

    let graceful = Arc::new(GracefulShutdown::new(
        state.connection_manager.clone(),
        state.coordinator.clone(),
        shutdown_tx.clone(),
    ));

    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(graceful))
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = heartbeat_handle.await;
    if let Some(handle) = subscriber_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(graceful: Arc<GracefulShutdown>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "sigterm",
    };
    tracing::info!(reason = reason, "Shutdown signal received, initiating graceful shutdown");

    // Release every room seat held by this instance before sockets drop
    graceful.execute(reason).await;
}

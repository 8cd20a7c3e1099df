use anyhow::Context;
use clap::Parser;
use std::{sync::Arc, time::Instant};
use tracing::{info, warn};

use rfid_display::{
    config::{AppConfig, Cli},
    logging,
    serial::{ListenerSettings, SerialTagListener, TokioSerialConnector},
    state::AppState,
    tagmap::watcher::watch_tag_map,
    web,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started = Instant::now();
    let cli = Cli::parse();

    logging::init_logging_with_options(cli.log_level.as_deref(), cli.debug)?;

    let config = AppConfig::from_cli(&cli).context("Failed to load configuration")?;
    logging::log_startup_info(&config);

    let addr = config.socket_addr()?;
    let app_state = AppState::new(config);

    // Keep the watcher alive for the lifetime of the server
    let _map_watcher = if app_state.config.rfid.watch_map_file {
        match watch_tag_map(app_state.tag_map.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Tag map watching disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let listener_handle = if app_state.config.serial.enabled {
        let connector = Arc::new(TokioSerialConnector::from_config(&app_state.config.serial));
        let settings = ListenerSettings::from(&app_state.config.serial);
        Some(SerialTagListener::new(connector, app_state.dispatcher.clone(), settings).start())
    } else {
        None
    };

    let app = web::create_router(app_state);

    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    if let Some(handle) = listener_handle {
        handle.stop().await;
    }
    logging::log_shutdown_info(started.elapsed().as_secs());

    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

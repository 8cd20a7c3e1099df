use anyhow::{anyhow, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Initialize logging; `RUST_LOG` takes precedence over `log_level`
pub fn init_logging_with_options(log_level: Option<&str>, debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let level = log_level.unwrap_or(default_level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;

    info!("Logging initialized with level: {}", level);
    Ok(())
}

/// Log the effective configuration and flag paths that do not exist yet
pub fn log_startup_info(config: &AppConfig) {
    info!("=== RFID Display Starting ===");
    info!("HTTP interface: {}:{}", config.server.interface, config.server.port);

    let media_dir = &config.media.directory;
    if media_dir.is_dir() {
        info!("Media directory: {} (served at {})", media_dir.display(), config.media.url_prefix);
    } else {
        warn!("Media directory {} does not exist - every mapped file will be reported missing", media_dir.display());
    }

    let map_file = &config.rfid.map_file;
    if map_file.is_file() {
        info!("Tag map: {}", map_file.display());
    } else {
        warn!("Tag map {} not found - all tags will be unknown until it is created", map_file.display());
    }
    info!("Tag map file watching: {}", config.rfid.watch_map_file);

    if config.serial.enabled {
        info!(
            "Serial reader: {} @ {} baud (reload every {}s, reconnect after {}s)",
            config.serial.device,
            config.serial.baud_rate,
            config.serial.reload_interval_secs,
            config.serial.reconnect_delay_secs
        );
    } else {
        info!("Serial reader disabled - accepting HTTP tag events only");
    }
}

/// Log shutdown information
pub fn log_shutdown_info(uptime_seconds: u64) {
    info!("=== RFID Display Shutting Down ===");

    let uptime_hours = uptime_seconds / 3600;
    let uptime_minutes = (uptime_seconds % 3600) / 60;
    info!("Total uptime: {}h {}m", uptime_hours, uptime_minutes);
}

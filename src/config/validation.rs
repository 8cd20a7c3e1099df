use anyhow::{anyhow, Context, Result};
use std::net::IpAddr;

use super::{AppConfig, MediaConfig, RfidConfig, SerialConfig, ServerConfig};

/// Configuration validator for ensuring configuration integrity
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        Self::validate_server_config(&config.server)?;
        Self::validate_media_config(&config.media)?;
        Self::validate_rfid_config(&config.rfid)?;
        Self::validate_serial_config(&config.serial)?;
        Ok(())
    }

    fn validate_server_config(server: &ServerConfig) -> Result<()> {
        if server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        server
            .interface
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid server interface address: {}", server.interface))?;

        Ok(())
    }

    fn validate_media_config(media: &MediaConfig) -> Result<()> {
        if media.directory.as_os_str().is_empty() {
            return Err(anyhow!("Media directory cannot be empty"));
        }

        if !media.url_prefix.starts_with('/') {
            return Err(anyhow!(
                "Media URL prefix must start with '/': {}",
                media.url_prefix
            ));
        }

        Ok(())
    }

    fn validate_rfid_config(rfid: &RfidConfig) -> Result<()> {
        if rfid.map_file.as_os_str().is_empty() {
            return Err(anyhow!("Tag map file path cannot be empty"));
        }
        Ok(())
    }

    fn validate_serial_config(serial: &SerialConfig) -> Result<()> {
        // A disabled listener may carry placeholder values
        if !serial.enabled {
            return Ok(());
        }

        if serial.device.trim().is_empty() {
            return Err(anyhow!("Serial device cannot be empty"));
        }
        if serial.baud_rate == 0 {
            return Err(anyhow!("Serial baud rate must be greater than 0"));
        }
        if serial.reload_interval_secs == 0 {
            return Err(anyhow!("Tag map reload interval must be greater than 0 seconds"));
        }
        if serial.reconnect_delay_secs == 0 {
            return Err(anyhow!("Serial reconnect delay must be greater than 0 seconds"));
        }
        if serial.poll_interval_ms == 0 {
            return Err(anyhow!("Serial poll interval must be greater than 0 milliseconds"));
        }

        Ok(())
    }
}

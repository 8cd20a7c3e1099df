use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

pub mod validation;

use validation::ConfigValidator;

/// Command line arguments; every value overrides the configuration file
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Displays the media selected by RFID tags", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file (created with defaults if missing)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// The network port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the media files to display
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// JSON document mapping tag ids to media files
    #[arg(long)]
    pub map_file: Option<PathBuf>,

    /// Serial device the RFID reader is attached to
    #[arg(long)]
    pub serial_device: Option<String>,

    /// Disable the serial listener (HTTP events only)
    #[arg(long)]
    pub no_serial: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Log level filter, e.g. "info" or "rfid_display=debug"
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Main application configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub rfid: RfidConfig,
    pub serial: SerialConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub interface: String,
    pub port: u16,
}

/// Media directory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub directory: PathBuf,
    /// URL prefix the media directory is served under
    pub url_prefix: String,
}

/// Tag map settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    pub map_file: PathBuf,
    pub watch_map_file: bool,
}

/// Serial reader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub enabled: bool,
    pub device: String,
    pub baud_rate: u32,
    pub reload_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("app/static/images"),
            url_prefix: "/static/images".to_string(),
        }
    }
}

impl Default for RfidConfig {
    fn default() -> Self {
        Self {
            map_file: PathBuf::from("rfid_map.json"),
            watch_map_file: true,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "/dev/rfcomm0".to_string(),
            baud_rate: 115_200,
            reload_interval_secs: 5,
            reconnect_delay_secs: 2,
            poll_interval_ms: 100,
        }
    }
}

impl AppConfig {
    /// Default location of the configuration file for this platform
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("rfid-display").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Load the configuration named by the command line and apply its overrides
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(Self::default_config_path);
        let mut config = Self::load_or_create(&config_path)?;
        config.apply_cli_overrides(cli);

        ConfigValidator::validate(&config)
            .context("Invalid configuration after command line overrides")?;
        Ok(config)
    }

    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(media_dir) = &cli.media_dir {
            self.media.directory = media_dir.clone();
        }
        if let Some(map_file) = &cli.map_file {
            self.rfid.map_file = map_file.clone();
        }
        if let Some(device) = &cli.serial_device {
            self.serial.device = device.clone();
        }
        if cli.no_serial {
            self.serial.enabled = false;
        }
    }

    /// Load configuration from file or create it with defaults
    pub fn load_or_create<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        if config_path.exists() {
            Self::load_from_file(config_path)
        } else {
            let default_config = Self::default();
            default_config.save_to_file(config_path).with_context(|| {
                format!("Failed to create default configuration file at: {}", config_path.display())
            })?;

            tracing::info!("Created default configuration file at: {}", config_path.display());
            Ok(default_config)
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let content = std::fs::read_to_string(config_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", config_path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.as_ref().display()))?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, config_path: P) -> Result<()> {
        let config_path = config_path.as_ref();

        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let body = toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        let content = format!(
            "# RFID display configuration\n\
             # The tag map is a JSON object of tag id -> media file name,\n\
             # with the reserved key \"default\" for the idle media.\n\n{}",
            body
        );

        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .interface
            .parse()
            .with_context(|| format!("Invalid server interface address: {}", self.server.interface))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Public URL of a file in the media directory
    pub fn media_url(&self, filename: &str) -> String {
        format!("{}/{}", self.media.url_prefix.trim_end_matches('/'), filename)
    }
}

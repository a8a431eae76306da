//! Command line and environment settings
//!
//! Every option can also come from the environment (or a `.env` file):
//!
//! | Variable | Flag | Default |
//! |----------|------|---------|
//! | PRINTER_CONFIG | `--config` | none |
//! | LOG_LEVEL | `--log-level` | info |
//! | LOG_JSON | `--json-logs` | false |
//!
//! Flags win over the environment.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use receipt_print::{
    DEFAULT_FEED_LINES, DEFAULT_PORT, DeviceConfig, PrintError, PrintResult, RasterImage,
    TransportConfig,
};

#[derive(Debug, Parser)]
#[command(name = "receipt-print", version, about = "Print images on ESC/POS thermal printers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Device config (JSON)
    #[arg(long, global = true, env = "PRINTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run the whole pipeline but capture bytes instead of printing
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LOG_JSON")]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print an image file
    Print { image: PathBuf },
    /// Feed paper
    Feed {
        #[arg(long, default_value_t = DEFAULT_FEED_LINES)]
        lines: u8,
    },
    /// Cut paper using the configured cut mode
    Cut,
}

/// Load the device config.
///
/// A dry run without a config file prints against a default network device.
pub fn device_config(path: Option<&Path>, dry_run: bool) -> PrintResult<DeviceConfig> {
    match path {
        Some(path) => load_device_config(path),
        None if dry_run => Ok(DeviceConfig::new(TransportConfig::network(
            "127.0.0.1",
            DEFAULT_PORT,
        ))),
        None => Err(PrintError::config(
            "Device config missing: pass --config or set PRINTER_CONFIG",
        )),
    }
}

pub fn load_device_config(path: &Path) -> PrintResult<DeviceConfig> {
    let text = fs::read_to_string(path).map_err(|e| {
        PrintError::config(format!(
            "Cannot read device config {}: {}",
            path.display(),
            e
        ))
        .with_cause(e)
    })?;
    DeviceConfig::from_json(&text)
}

/// Decode an image file into grayscale
pub fn load_image(path: &Path) -> PrintResult<RasterImage> {
    let img = image::open(path).map_err(|e| {
        PrintError::job(format!("Cannot read image {}: {}", path.display(), e)).with_cause(e)
    })?;
    RasterImage::from_dynamic(&img)
}

//! Device configuration
//!
//! A [`DeviceConfig`] is produced by the settings layer (or loaded from JSON
//! by the CLI) and is read-only once a job starts. The transport addressing
//! is a tagged enum, so a config can never carry addressing that does not
//! match its transport kind.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PrintError, PrintResult};

/// Default raw TCP port for network printers
pub const DEFAULT_PORT: u16 = 9100;

/// Default baud rate for serial printers
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default darkness cutoff
pub const DEFAULT_DARKNESS: u8 = 180;

/// Default open/send timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Default printer profile name
pub const DEFAULT_PROFILE: &str = "TM-T88IV";

/// Transport kind, without addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Network,
    Serial,
    Usb,
}

impl TransportKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Serial => "serial",
            Self::Usb => "usb",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport kind together with its addressing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Raw TCP (usually port 9100)
    Network {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    /// RS-232 / USB-serial adapter
    Serial {
        device: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// USB printer class device, bulk-OUT endpoint
    Usb {
        #[serde(deserialize_with = "hex_u16")]
        vendor_id: u16,
        #[serde(deserialize_with = "hex_u16")]
        product_id: u16,
        /// Bulk-OUT endpoint address; first bulk-OUT endpoint when absent
        #[serde(default, deserialize_with = "hex_u8_opt")]
        endpoint: Option<u8>,
        /// Interface number; first interface with a bulk-OUT endpoint when absent
        #[serde(default)]
        interface: Option<u8>,
    },
}

impl TransportConfig {
    pub fn network(host: impl Into<String>, port: u16) -> Self {
        Self::Network {
            host: host.into(),
            port,
        }
    }

    pub fn serial(device: impl Into<String>, baud_rate: u32) -> Self {
        Self::Serial {
            device: device.into(),
            baud_rate,
        }
    }

    pub fn usb(vendor_id: u16, product_id: u16) -> Self {
        Self::Usb {
            vendor_id,
            product_id,
            endpoint: None,
            interface: None,
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Network { .. } => TransportKind::Network,
            Self::Serial { .. } => TransportKind::Serial,
            Self::Usb { .. } => TransportKind::Usb,
        }
    }

    /// Check the addressing fields
    pub fn validate(&self) -> PrintResult<()> {
        match self {
            Self::Network { host, port } => {
                if host.trim().is_empty() {
                    return Err(PrintError::config("Network printer requires a host"));
                }
                if *port == 0 {
                    return Err(PrintError::config("Network printer requires a non-zero port"));
                }
            }
            Self::Serial { device, baud_rate } => {
                if device.trim().is_empty() {
                    return Err(PrintError::config("Serial printer requires a device path"));
                }
                if *baud_rate == 0 {
                    return Err(PrintError::config("Serial printer requires a non-zero baud rate"));
                }
            }
            Self::Usb {
                vendor_id,
                product_id,
                endpoint,
                ..
            } => {
                if *vendor_id == 0 || *product_id == 0 {
                    return Err(PrintError::config(
                        "USB printer requires vendor_id and product_id",
                    ));
                }
                if let Some(ep) = endpoint
                    && ep & 0x80 != 0
                {
                    return Err(PrintError::config(format!(
                        "USB endpoint 0x{:02x} is an IN endpoint; an OUT endpoint is required",
                        ep
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::Serial { device, baud_rate } => write!(f, "serial:{}@{}", device, baud_rate),
            Self::Usb {
                vendor_id,
                product_id,
                ..
            } => write!(f, "usb:{:04x}:{:04x}", vendor_id, product_id),
        }
    }
}

/// Paper cut performed after a print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMode {
    Full,
    #[default]
    Partial,
    None,
}

/// Everything the pipeline needs to know about one printer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub transport: TransportConfig,

    /// Grayscale cutoff: values strictly above it print white (1-255)
    #[serde(default = "default_darkness")]
    pub darkness: u8,

    #[serde(default)]
    pub cut_mode: CutMode,

    /// Target raster width in dots; 0 keeps the image's own width
    #[serde(default)]
    pub width_px: u32,

    /// Widest raster the device accepts, if the profile declares one
    #[serde(default)]
    pub max_width_px: Option<u32>,

    /// Open and send timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    #[serde(default = "default_profile")]
    pub profile: String,
}

impl DeviceConfig {
    /// Create a config with default settings for the given transport
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            darkness: DEFAULT_DARKNESS,
            cut_mode: CutMode::default(),
            width_px: 0,
            max_width_px: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            profile: DEFAULT_PROFILE.to_string(),
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> PrintResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_darkness(mut self, darkness: u8) -> Self {
        self.darkness = darkness;
        self
    }

    pub fn with_cut_mode(mut self, cut_mode: CutMode) -> Self {
        self.cut_mode = cut_mode;
        self
    }

    pub fn with_width(mut self, width_px: u32) -> Self {
        self.width_px = width_px;
        self
    }

    pub fn with_max_width(mut self, max_width_px: u32) -> Self {
        self.max_width_px = Some(max_width_px);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Timeout as a [`Duration`]. Only meaningful after [`validate`](Self::validate).
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }

    /// Check every invariant the pipeline relies on
    pub fn validate(&self) -> PrintResult<()> {
        self.transport.validate()?;

        if self.darkness == 0 {
            return Err(PrintError::config("Darkness must be between 1 and 255"));
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            return Err(PrintError::config(format!(
                "Timeout must be a positive number of seconds, got {}",
                self.timeout_secs
            )));
        }
        if self.max_width_px == Some(0) {
            return Err(PrintError::config("max_width_px must be positive when set"));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_darkness() -> u8 {
    DEFAULT_DARKNESS
}

fn default_timeout_secs() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

/// USB ids are stored either as numbers or as hex strings ("0x04b8", "04b8").
#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrHex {
    Num(u64),
    Hex(String),
}

impl NumOrHex {
    fn parse(self) -> Result<u64, String> {
        match self {
            Self::Num(n) => Ok(n),
            Self::Hex(s) => {
                let trimmed = s.trim();
                let digits = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                    .unwrap_or(trimmed);
                u64::from_str_radix(digits, 16).map_err(|_| format!("invalid hex value: {:?}", s))
            }
        }
    }
}

fn hex_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = NumOrHex::deserialize(deserializer)?
        .parse()
        .map_err(serde::de::Error::custom)?;
    u16::try_from(value).map_err(|_| serde::de::Error::custom(format!("{} exceeds 0xffff", value)))
}

fn hex_u8_opt<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<NumOrHex>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let value = raw.parse().map_err(serde::de::Error::custom)?;
    u8::try_from(value)
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("{} exceeds 0xff", value)))
}

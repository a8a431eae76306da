//! Device transports
//!
//! A [`Transport`] opens a [`Connection`] for exactly one job; the worker
//! wraps it in a [`TransportHandle`], which tracks the per-handle state and
//! makes `close` best effort.
//!
//! Supports:
//! - Network printers (raw TCP, usually port 9100)
//! - Serial printers (feature `serial`)
//! - USB printer class devices (feature `usb`)
//! - Dry run (captures bytes, no I/O)

mod dry_run;
mod network;
#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "usb")]
mod usb;

pub use dry_run::{Capture, DryRunTransport};
pub use network::NetworkTransport;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;
#[cfg(feature = "usb")]
pub use usb::UsbTransport;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{DeviceConfig, TransportKind};
use crate::error::{PrintError, PrintResult};

/// Opens connections to one kind of device
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Backend name used in logs and job reports
    fn name(&self) -> &'static str;

    /// Open a connection using the addressing in `config`.
    ///
    /// Fails with a Connection error when the device cannot be reached and
    /// with a Config error when the addressing is unusable.
    async fn open(&self, config: &DeviceConfig) -> PrintResult<TransportHandle>;
}

/// One open connection
#[async_trait]
pub trait Connection: Send {
    /// Write every byte or fail; no partial-write retry.
    async fn write_all(&mut self, data: &[u8]) -> PrintResult<()>;

    async fn close(&mut self) -> PrintResult<()>;

    /// Optional media width capability
    fn media_width(&mut self) -> Option<&mut dyn MediaWidth> {
        None
    }
}

/// Connections that want to know the raster width before data arrives
///
/// Only the dry run records it. The network, serial and USB connections
/// leave `media_width` at `None`, so the hint is dropped and rasters print
/// left-aligned at their encoded width.
pub trait MediaWidth: Send {
    fn set_media_width(&mut self, dots: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Open,
    Sending,
    Closed,
}

/// Exclusively owned connection valid for a single job
pub struct TransportHandle {
    backend: &'static str,
    conn: Box<dyn Connection>,
    state: HandleState,
    bytes_sent: u64,
}

impl TransportHandle {
    pub fn new(backend: &'static str, conn: Box<dyn Connection>) -> Self {
        Self {
            backend,
            conn,
            state: HandleState::Open,
            bytes_sent: 0,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn media_width(&mut self) -> Option<&mut dyn MediaWidth> {
        self.conn.media_width()
    }

    /// Send one chunk. A failed send leaves the handle closable.
    pub async fn send(&mut self, data: &[u8]) -> PrintResult<()> {
        if self.state == HandleState::Closed {
            return Err(PrintError::job(format!(
                "{} handle already closed",
                self.backend
            )));
        }

        self.state = HandleState::Sending;
        let result = self.conn.write_all(data).await;
        self.state = HandleState::Open;

        result?;
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    /// Best-effort close; failures are logged, never returned.
    pub async fn close(mut self) {
        self.state = HandleState::Closed;
        if let Err(e) = self.conn.close().await {
            warn!(backend = self.backend, error = %e, "Failed to close printer connection");
        }
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("backend", &self.backend)
            .field("state", &self.state)
            .field("bytes_sent", &self.bytes_sent)
            .finish()
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if self.state != HandleState::Closed {
            debug!(backend = self.backend, "Transport handle dropped without close");
        }
    }
}

/// Optional transports available in this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub serial: bool,
    pub usb: bool,
}

impl Capabilities {
    /// Probe compiled-in features; USB also requires libusb to initialise.
    pub fn probe() -> Self {
        Self {
            serial: cfg!(feature = "serial"),
            usb: probe_usb(),
        }
    }

    /// Network and dry run only
    pub fn none() -> Self {
        Self {
            serial: false,
            usb: false,
        }
    }

    pub fn supports(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Network => true,
            TransportKind::Serial => self.serial,
            TransportKind::Usb => self.usb,
        }
    }
}

#[cfg(feature = "usb")]
fn probe_usb() -> bool {
    match rusb::Context::new() {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "libusb unavailable, USB transport disabled");
            false
        }
    }
}

#[cfg(not(feature = "usb"))]
fn probe_usb() -> bool {
    false
}

/// Resolves the transport for a job
#[derive(Debug, Clone)]
pub enum TransportFactory {
    /// Real devices, limited by the probed capabilities
    Live(Capabilities),
    /// Every job goes to the same transport (dry run, tests)
    Fixed(Arc<dyn Transport>),
}

impl TransportFactory {
    pub fn live() -> Self {
        Self::Live(Capabilities::probe())
    }

    pub fn dry_run(transport: &DryRunTransport) -> Self {
        Self::Fixed(Arc::new(transport.clone()))
    }

    pub fn custom(transport: Arc<dyn Transport>) -> Self {
        Self::Fixed(transport)
    }

    /// Pick the backend for `config`; a missing capability is a Config error.
    pub fn transport_for(&self, config: &DeviceConfig) -> PrintResult<Arc<dyn Transport>> {
        let caps = match self {
            Self::Fixed(t) => return Ok(Arc::clone(t)),
            Self::Live(caps) => caps,
        };

        let kind = config.kind();
        if !caps.supports(kind) {
            return Err(PrintError::config(format!(
                "{} transport not installed in this build",
                kind
            )));
        }

        match kind {
            TransportKind::Network => Ok(Arc::new(NetworkTransport)),
            #[cfg(feature = "serial")]
            TransportKind::Serial => Ok(Arc::new(SerialTransport)),
            #[cfg(feature = "usb")]
            TransportKind::Usb => Ok(Arc::new(UsbTransport)),
            #[allow(unreachable_patterns)]
            other => Err(PrintError::config(format!(
                "{} transport not installed in this build",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::error::ErrorKind;

    #[test]
    fn test_missing_capability_is_config() {
        let factory = TransportFactory::Live(Capabilities::none());

        let serial = DeviceConfig::new(TransportConfig::serial("/dev/ttyUSB0", 19200));
        let err = factory.transport_for(&serial).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("not installed"));

        let usb = DeviceConfig::new(TransportConfig::usb(0x04b8, 0x0202));
        assert_eq!(
            factory.transport_for(&usb).unwrap_err().kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_network_always_available() {
        let factory = TransportFactory::Live(Capabilities::none());
        let config = DeviceConfig::new(TransportConfig::network("127.0.0.1", 9100));
        assert_eq!(factory.transport_for(&config).unwrap().name(), "network");
    }

    #[test]
    fn test_fixed_factory_ignores_kind() {
        let dry = DryRunTransport::new();
        let factory = TransportFactory::dry_run(&dry);
        let config = DeviceConfig::new(TransportConfig::usb(0x04b8, 0x0202));
        assert_eq!(factory.transport_for(&config).unwrap().name(), "dry_run");
    }

    #[test]
    fn test_probe_reflects_features() {
        let caps = Capabilities::probe();
        assert_eq!(caps.serial, cfg!(feature = "serial"));
        if !cfg!(feature = "usb") {
            assert!(!caps.usb);
        }
    }

    #[tokio::test]
    async fn test_handle_state_and_counter() {
        let dry = DryRunTransport::new();
        let config = DeviceConfig::new(TransportConfig::network("127.0.0.1", 9100));
        let mut handle = dry.open(&config).await.unwrap();
        assert_eq!(handle.state(), HandleState::Open);

        handle.send(&[1, 2, 3]).await.unwrap();
        handle.send(&[4]).await.unwrap();
        assert_eq!(handle.bytes_sent(), 4);
        assert_eq!(handle.state(), HandleState::Open);

        handle.close().await;
        assert_eq!(dry.snapshot().closes, 1);
    }
}

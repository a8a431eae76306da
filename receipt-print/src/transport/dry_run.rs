//! Dry-run transport: the full pipeline without hardware

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{Connection, MediaWidth, Transport, TransportHandle};
use crate::config::DeviceConfig;
use crate::error::PrintResult;

/// Everything a dry run has seen so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    /// Sent chunks in order
    pub chunks: Vec<Vec<u8>>,
    pub total_bytes: u64,
    pub opens: u32,
    pub closes: u32,
    /// Last media width hint, in dots
    pub media_width: Option<u32>,
}

/// Records every send instead of talking to a device.
///
/// Clones share the same capture.
#[derive(Debug, Clone, Default)]
pub struct DryRunTransport {
    capture: Arc<Mutex<Capture>>,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Capture> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Capture {
        self.lock().clone()
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.lock().chunks.clone()
    }

    pub fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    /// All captured bytes concatenated
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().chunks.concat()
    }

    pub fn clear(&self) {
        *self.lock() = Capture::default();
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    async fn open(&self, config: &DeviceConfig) -> PrintResult<TransportHandle> {
        self.lock().opens += 1;
        debug!(device = %config.transport, "Dry run open");
        Ok(TransportHandle::new(
            self.name(),
            Box::new(DryRunConnection {
                capture: Arc::clone(&self.capture),
            }),
        ))
    }
}

struct DryRunConnection {
    capture: Arc<Mutex<Capture>>,
}

impl DryRunConnection {
    fn lock(&self) -> MutexGuard<'_, Capture> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connection for DryRunConnection {
    async fn write_all(&mut self, data: &[u8]) -> PrintResult<()> {
        let mut capture = self.lock();
        capture.chunks.push(data.to_vec());
        capture.total_bytes += data.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> PrintResult<()> {
        self.lock().closes += 1;
        Ok(())
    }

    fn media_width(&mut self) -> Option<&mut dyn MediaWidth> {
        Some(self)
    }
}

impl MediaWidth for DryRunConnection {
    fn set_media_width(&mut self, dots: u32) {
        self.lock().media_width = Some(dots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    #[tokio::test]
    async fn test_records_in_order() {
        let dry = DryRunTransport::new();
        let config = DeviceConfig::new(TransportConfig::network("printer.local", 9100));

        let mut handle = dry.open(&config).await.unwrap();
        handle.media_width().unwrap().set_media_width(384);
        handle.send(b"abc").await.unwrap();
        handle.send(b"de").await.unwrap();
        handle.close().await;

        let capture = dry.snapshot();
        assert_eq!(capture.chunks, vec![b"abc".to_vec(), b"de".to_vec()]);
        assert_eq!(capture.total_bytes, 5);
        assert_eq!((capture.opens, capture.closes), (1, 1));
        assert_eq!(capture.media_width, Some(384));
        assert_eq!(dry.bytes(), b"abcde".to_vec());

        dry.clear();
        assert_eq!(dry.snapshot(), Capture::default());
    }
}

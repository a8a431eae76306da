//! Network printer (raw TCP)
//!
//! Most thermal printers accept raw ESC/POS on port 9100.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, instrument};

use super::{Connection, Transport, TransportHandle};
use crate::config::{DeviceConfig, TransportConfig};
use crate::error::{PrintError, PrintResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkTransport;

#[async_trait]
impl Transport for NetworkTransport {
    fn name(&self) -> &'static str {
        "network"
    }

    #[instrument(skip_all, fields(device = %config.transport))]
    async fn open(&self, config: &DeviceConfig) -> PrintResult<TransportHandle> {
        let TransportConfig::Network { host, port } = &config.transport else {
            return Err(PrintError::config(format!(
                "network transport requires a network address, got {}",
                config.transport
            )));
        };
        config.transport.validate()?;

        info!("Connecting to printer");
        let timeout = config.timeout();
        let stream =
            tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), *port))).await??;
        stream.set_nodelay(true)?;
        info!("Connected");

        Ok(TransportHandle::new(
            self.name(),
            Box::new(NetworkConnection { stream, timeout }),
        ))
    }
}

struct NetworkConnection {
    stream: TcpStream,
    timeout: Duration,
}

#[async_trait]
impl Connection for NetworkConnection {
    async fn write_all(&mut self, data: &[u8]) -> PrintResult<()> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(data).await?;
            self.stream.flush().await
        })
        .await??;
        Ok(())
    }

    async fn close(&mut self) -> PrintResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

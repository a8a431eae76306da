//! Serial printer (RS-232 or USB-serial adapter)

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, instrument};

use super::{Connection, Transport, TransportHandle};
use crate::config::{DeviceConfig, TransportConfig};
use crate::error::{PrintError, PrintResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &'static str {
        "serial"
    }

    #[instrument(skip_all, fields(device = %config.transport))]
    async fn open(&self, config: &DeviceConfig) -> PrintResult<TransportHandle> {
        let TransportConfig::Serial { device, baud_rate } = &config.transport else {
            return Err(PrintError::config(format!(
                "serial transport requires a device path, got {}",
                config.transport
            )));
        };
        config.transport.validate()?;

        let timeout = config.timeout();
        let builder = tokio_serial::new(device.as_str(), *baud_rate).timeout(timeout);
        // Opening can block on the tty; blocking threads keep the runtime context
        let port = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || builder.open_native_async()),
        )
        .await???;
        info!("Serial port opened");

        Ok(TransportHandle::new(
            self.name(),
            Box::new(SerialConnection { port, timeout }),
        ))
    }
}

struct SerialConnection {
    port: SerialStream,
    timeout: Duration,
}

#[async_trait]
impl Connection for SerialConnection {
    async fn write_all(&mut self, data: &[u8]) -> PrintResult<()> {
        tokio::time::timeout(self.timeout, async {
            self.port.write_all(data).await?;
            self.port.flush().await
        })
        .await??;
        Ok(())
    }

    async fn close(&mut self) -> PrintResult<()> {
        self.port.flush().await?;
        Ok(())
    }
}

//! USB printer class device over libusb
//!
//! libusb calls block, so every device operation runs under
//! `spawn_blocking`. The device handle moves into the blocking closure and
//! comes back out with the result.

use std::time::Duration;

use async_trait::async_trait;
use rusb::{DeviceHandle, Direction, GlobalContext, TransferType};
use tracing::{debug, info, instrument, warn};

use super::{Connection, Transport, TransportHandle};
use crate::config::{DeviceConfig, TransportConfig};
use crate::error::{PrintError, PrintResult};

/// Bulk transfer chunk size
const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct UsbTransport;

#[async_trait]
impl Transport for UsbTransport {
    fn name(&self) -> &'static str {
        "usb"
    }

    #[instrument(skip_all, fields(device = %config.transport))]
    async fn open(&self, config: &DeviceConfig) -> PrintResult<TransportHandle> {
        let TransportConfig::Usb {
            vendor_id,
            product_id,
            endpoint,
            interface,
        } = config.transport
        else {
            return Err(PrintError::config(format!(
                "usb transport requires vendor_id and product_id, got {}",
                config.transport
            )));
        };
        config.transport.validate()?;

        // On timeout the blocking open still finishes and drops the handle
        let timeout = config.timeout();
        let conn = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || {
                UsbConnection::open(vendor_id, product_id, interface, endpoint, timeout)
            }),
        )
        .await???;

        info!(
            interface = conn.interface,
            endpoint = conn.endpoint,
            "USB device claimed"
        );
        Ok(TransportHandle::new(self.name(), Box::new(conn)))
    }
}

struct UsbConnection {
    handle: Option<DeviceHandle<GlobalContext>>,
    interface: u8,
    endpoint: u8,
    detached: bool,
    timeout: Duration,
}

impl UsbConnection {
    fn open(
        vendor_id: u16,
        product_id: u16,
        interface: Option<u8>,
        endpoint: Option<u8>,
        timeout: Duration,
    ) -> PrintResult<Self> {
        let mut handle = rusb::open_device_with_vid_pid(vendor_id, product_id).ok_or_else(|| {
            PrintError::connection(format!(
                "USB printer {:04x}:{:04x} not found",
                vendor_id, product_id
            ))
        })?;

        let (interface, endpoint) = find_bulk_out(&handle, interface, endpoint)?;

        // Not every platform can report or detach kernel drivers
        let detached = match handle.kernel_driver_active(interface) {
            Ok(true) => {
                handle.detach_kernel_driver(interface)?;
                debug!(interface, "Detached kernel driver");
                true
            }
            _ => false,
        };

        if let Err(e) = handle.claim_interface(interface) {
            if detached {
                let _ = handle.attach_kernel_driver(interface);
            }
            return Err(e.into());
        }

        Ok(Self {
            handle: Some(handle),
            interface,
            endpoint,
            detached,
            timeout,
        })
    }
}

/// One endpoint of the active configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EndpointInfo {
    interface: u8,
    address: u8,
    direction: Direction,
    transfer_type: TransferType,
}

/// Locate the bulk-OUT endpoint, honouring an explicit interface and endpoint
fn find_bulk_out(
    handle: &DeviceHandle<GlobalContext>,
    want_interface: Option<u8>,
    want_endpoint: Option<u8>,
) -> PrintResult<(u8, u8)> {
    let config = handle.device().active_config_descriptor()?;

    let mut endpoints = Vec::new();
    for iface in config.interfaces() {
        for desc in iface.descriptors() {
            endpoints.extend(desc.endpoint_descriptors().map(|ep| EndpointInfo {
                interface: desc.interface_number(),
                address: ep.address(),
                direction: ep.direction(),
                transfer_type: ep.transfer_type(),
            }));
        }
    }

    pick_bulk_out(&endpoints, want_interface, want_endpoint)
}

/// First bulk-OUT endpoint in descriptor order that matches the filters
fn pick_bulk_out(
    endpoints: &[EndpointInfo],
    want_interface: Option<u8>,
    want_endpoint: Option<u8>,
) -> PrintResult<(u8, u8)> {
    endpoints
        .iter()
        .find(|ep| {
            ep.direction == Direction::Out
                && ep.transfer_type == TransferType::Bulk
                && want_interface.is_none_or(|n| n == ep.interface)
                && want_endpoint.is_none_or(|addr| addr == ep.address)
        })
        .map(|ep| (ep.interface, ep.address))
        .ok_or_else(|| {
            PrintError::config(match (want_interface, want_endpoint) {
                (Some(i), Some(e)) => {
                    format!("no bulk-OUT endpoint {:#04x} on interface {}", e, i)
                }
                (Some(i), None) => format!("no bulk-OUT endpoint on interface {}", i),
                (None, Some(e)) => format!("no bulk-OUT endpoint {:#04x} on device", e),
                (None, None) => {
                    "USB device has no bulk-OUT endpoint; printer class not supported".to_string()
                }
            })
        })
}

/// Feed `data` to `write` in `CHUNK_SIZE` pieces, resuming after short writes.
///
/// `write` returns how many bytes the device accepted.
fn write_chunks(
    data: &[u8],
    mut write: impl FnMut(&[u8]) -> PrintResult<usize>,
) -> PrintResult<()> {
    for chunk in data.chunks(CHUNK_SIZE) {
        let mut offset = 0;
        while offset < chunk.len() {
            let written = write(&chunk[offset..])?;
            if written == 0 {
                return Err(PrintError::connection(
                    "USB printer stopped accepting data",
                ));
            }
            offset += written;
        }
    }
    Ok(())
}

#[async_trait]
impl Connection for UsbConnection {
    async fn write_all(&mut self, data: &[u8]) -> PrintResult<()> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| PrintError::connection("USB device handle lost"))?;
        let (endpoint, timeout) = (self.endpoint, self.timeout);
        let data = data.to_vec();

        let (handle, result) = tokio::task::spawn_blocking(move || {
            let result = write_chunks(&data, |chunk| {
                Ok(handle.write_bulk(endpoint, chunk, timeout)?)
            });
            (handle, result)
        })
        .await?;

        self.handle = Some(handle);
        result
    }

    async fn close(&mut self) -> PrintResult<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        let (interface, detached) = (self.interface, self.detached);

        tokio::task::spawn_blocking(move || {
            handle.release_interface(interface)?;
            if detached {
                if let Err(e) = handle.attach_kernel_driver(interface) {
                    warn!(interface, error = %e, "Failed to re-attach kernel driver");
                }
            }
            Ok::<_, PrintError>(())
        })
        .await?
    }
}

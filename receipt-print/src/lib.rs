//! # receipt-print
//!
//! Raster printing pipeline for ESC/POS thermal printers.
//!
//! ## Scope
//!
//! This crate turns a grayscale image into printed paper:
//! - Resize and threshold to a 1-bit raster
//! - `GS v 0` raster, feed and cut command encoding
//! - Network (TCP 9100), serial and USB transports, plus a dry run
//! - One-job-at-a-time worker with classified errors
//!
//! Loading images from files and reading config from disk stay in the
//! application (see `receipt-print-cli`).
//!
//! ## Example
//!
//! ```ignore
//! use receipt_print::{DeviceConfig, PrintJob, PrintWorker, RasterImage, TransportFactory};
//!
//! let config = DeviceConfig::from_json(r#"{
//!     "transport": { "kind": "network", "host": "192.168.1.50" },
//!     "width_px": 576
//! }"#)?;
//! let image = RasterImage::from_dynamic(&image::open("logo.png")?)?;
//!
//! let worker = PrintWorker::new(tokio::runtime::Handle::current(), TransportFactory::live());
//! let report = worker.submit(PrintJob::print(image, config))?.wait().await?;
//! println!("sent {} bytes", report.bytes_sent);
//! ```

mod config;
mod error;
mod escpos;
mod job;
mod raster;
pub mod transport;
mod worker;

// Re-exports
pub use config::{
    CutMode, DeviceConfig, TransportConfig, TransportKind, DEFAULT_BAUD_RATE, DEFAULT_DARKNESS,
    DEFAULT_PORT, DEFAULT_PROFILE, DEFAULT_TIMEOUT_SECS,
};
pub use error::{classify, BoxError, ErrorKind, PrintError, PrintResult};
pub use escpos::{encode_raster_command, EscPosBuilder, DEFAULT_FEED_LINES};
pub use job::{JobAction, JobId, JobReport, PrintJob, RenderedJob};
pub use raster::{resize_to_width, threshold, MonoBitmap, RasterImage, MAX_PIXELS};
pub use transport::{
    Capabilities, DryRunTransport, Transport, TransportFactory, TransportHandle,
};
pub use worker::{JobHandle, PrintWorker};

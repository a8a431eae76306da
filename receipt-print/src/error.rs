//! Error types for the printing pipeline
//!
//! Every failure that reaches a job's completion notification is a
//! [`PrintError`] of one of three kinds. Raw I/O, libusb, serial-port and
//! parse errors are folded in by [`classify`]; the `From` impls at the bottom
//! of this module route through it, so `?` classifies at the call site and a
//! second pass is a no-op.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error kept as the diagnostic cause of a [`PrintError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for printing operations
pub type PrintResult<T> = Result<T, PrintError>;

const HINT_REFUSED: &str = "Printer refused the connection. Is it powered on and listening?";
const HINT_RESET: &str = "Connection to the printer was reset unexpectedly.";
const HINT_TIMEOUT: &str = "Printer connection timed out. Check the network or cable.";
const HINT_IO: &str = "I/O error communicating with the printer";

/// Text fragments that mark an otherwise untyped failure as a configuration problem.
const CONFIG_KEYWORDS: &[&str] = &[
    "not installed",
    "missing",
    "requires",
    "unknown interface",
    "unknown transport",
    "not supported",
];

/// Error taxonomy shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Device unreachable, timed out or reset. Retriable by re-submitting the job.
    Connection,
    /// Missing or invalid addressing, unsupported transport, missing capability.
    Config,
    /// Content or logic problems (empty/oversized image, busy worker) and
    /// anything unclassified.
    Job,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Config => "config",
            Self::Job => "job",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classified printing error
///
/// Only [`kind`](Self::kind) and [`message`](Self::message) are meant for the
/// end user; the wrapped cause is available through `source()` for logs.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PrintError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<BoxError>,
}

impl PrintError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Device unreachable, timed out or reset
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Invalid or incomplete configuration
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Problem with the job itself
    pub fn job(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Job, message)
    }

    /// Rejection returned when a worker already has a job in flight
    pub fn busy() -> Self {
        Self::job("busy")
    }

    /// Attach the low-level error this report was derived from
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Connection failures may succeed when the job is submitted again.
    pub fn is_retriable(&self) -> bool {
        self.kind == ErrorKind::Connection
    }
}

/// Normalize any failure into a [`PrintError`].
///
/// Applied in order:
/// 1. a `PrintError` passes through unchanged
/// 2. connection-shaped failures become [`ErrorKind::Connection`] with a hint
/// 3. configuration-shaped failures become [`ErrorKind::Config`]
/// 4. everything else becomes [`ErrorKind::Job`] carrying the error's text
pub fn classify(err: impl Into<BoxError>) -> PrintError {
    let err: BoxError = err.into();
    let err = match err.downcast::<PrintError>() {
        Ok(report) => return *report,
        Err(other) => other,
    };

    let (kind, message) = inspect(&*err);
    PrintError::new(kind, message).with_cause(err)
}

fn inspect(err: &(dyn std::error::Error + Send + Sync + 'static)) -> (ErrorKind, String) {
    if let Some(e) = err.downcast_ref::<io::Error>() {
        return classify_io(e.kind(), &e.to_string());
    }

    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return (ErrorKind::Connection, HINT_TIMEOUT.to_string());
    }

    #[cfg(feature = "usb")]
    if let Some(e) = err.downcast_ref::<rusb::Error>() {
        return match e {
            rusb::Error::Timeout => (ErrorKind::Connection, HINT_TIMEOUT.to_string()),
            rusb::Error::NotSupported | rusb::Error::InvalidParam => {
                (ErrorKind::Config, format!("USB operation not supported: {}", e))
            }
            _ => (
                ErrorKind::Connection,
                format!("USB error communicating with the printer: {}", e),
            ),
        };
    }

    #[cfg(feature = "serial")]
    if let Some(e) = err.downcast_ref::<tokio_serial::Error>() {
        return match e.kind() {
            tokio_serial::ErrorKind::Io(kind) => classify_io(kind, &e.to_string()),
            tokio_serial::ErrorKind::InvalidInput => {
                (ErrorKind::Config, format!("Invalid serial settings: {}", e))
            }
            _ => (
                ErrorKind::Connection,
                format!("Serial device unavailable: {}", e),
            ),
        };
    }

    if let Some(e) = err.downcast_ref::<serde_json::Error>() {
        return (
            ErrorKind::Config,
            format!("Invalid device configuration: {}", e),
        );
    }

    if err.downcast_ref::<std::num::ParseIntError>().is_some()
        || err.downcast_ref::<std::num::ParseFloatError>().is_some()
    {
        return (ErrorKind::Config, err.to_string());
    }

    let text = err.to_string();
    let lower = text.to_lowercase();
    if CONFIG_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return (ErrorKind::Config, text);
    }

    (ErrorKind::Job, text)
}

fn classify_io(kind: io::ErrorKind, text: &str) -> (ErrorKind, String) {
    match kind {
        io::ErrorKind::ConnectionRefused => (ErrorKind::Connection, HINT_REFUSED.to_string()),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => (ErrorKind::Connection, HINT_RESET.to_string()),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            (ErrorKind::Connection, HINT_TIMEOUT.to_string())
        }
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => {
            (ErrorKind::Config, text.to_string())
        }
        _ => (ErrorKind::Connection, format!("{}: {}", HINT_IO, text)),
    }
}

impl From<io::Error> for PrintError {
    fn from(e: io::Error) -> Self {
        classify(e)
    }
}

impl From<tokio::time::error::Elapsed> for PrintError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        classify(e)
    }
}

impl From<tokio::task::JoinError> for PrintError {
    fn from(e: tokio::task::JoinError) -> Self {
        classify(e)
    }
}

impl From<serde_json::Error> for PrintError {
    fn from(e: serde_json::Error) -> Self {
        classify(e)
    }
}

impl From<image::ImageError> for PrintError {
    fn from(e: image::ImageError) -> Self {
        classify(e)
    }
}

#[cfg(feature = "usb")]
impl From<rusb::Error> for PrintError {
    fn from(e: rusb::Error) -> Self {
        classify(e)
    }
}

#[cfg(feature = "serial")]
impl From<tokio_serial::Error> for PrintError {
    fn from(e: tokio_serial::Error) -> Self {
        classify(e)
    }
}

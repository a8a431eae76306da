//! Print jobs and their rendered command stream

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::config::{CutMode, DeviceConfig};
use crate::error::{PrintError, PrintResult};
use crate::escpos::{self, EscPosBuilder, DEFAULT_FEED_LINES};
use crate::raster::{self, RasterImage};

/// Unique id of one submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Print,
    Feed { lines: u8 },
    Cut,
}

impl JobAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Feed { .. } => "feed",
            Self::Cut => "cut",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobAction {
    type Err = PrintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "print" => Ok(Self::Print),
            "feed" => Ok(Self::Feed {
                lines: DEFAULT_FEED_LINES,
            }),
            "cut" => Ok(Self::Cut),
            other => Err(PrintError::job(format!("Unknown action: {}", other))),
        }
    }
}

/// A unit of work for one printer
///
/// Carries an image only for [`JobAction::Print`].
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: JobId,
    pub action: JobAction,
    pub image: Option<RasterImage>,
    pub config: DeviceConfig,
}

impl PrintJob {
    pub fn new(action: JobAction, image: Option<RasterImage>, config: DeviceConfig) -> Self {
        Self {
            id: JobId::new(),
            action,
            image,
            config,
        }
    }

    pub fn print(image: RasterImage, config: DeviceConfig) -> Self {
        Self::new(JobAction::Print, Some(image), config)
    }

    pub fn feed(config: DeviceConfig) -> Self {
        Self::new(
            JobAction::Feed {
                lines: DEFAULT_FEED_LINES,
            },
            None,
            config,
        )
    }

    pub fn cut(config: DeviceConfig) -> Self {
        Self::new(JobAction::Cut, None, config)
    }

    /// Check the job before anything is opened
    pub fn validate(&self) -> PrintResult<()> {
        self.config.validate()?;
        match (&self.action, &self.image) {
            (JobAction::Print, None) => Err(PrintError::config("print job requires an image")),
            (JobAction::Print, Some(_)) => Ok(()),
            (action, Some(_)) => Err(PrintError::config(format!(
                "{} job does not take an image",
                action
            ))),
            (_, None) => Ok(()),
        }
    }

    /// Build the bytes to send, one entry per send.
    ///
    /// Print jobs are resized, thresholded and encoded here, so this is
    /// CPU-bound and belongs on a blocking thread.
    pub fn render(&self) -> PrintResult<RenderedJob> {
        match self.action {
            JobAction::Print => {
                let image = self
                    .image
                    .as_ref()
                    .ok_or_else(|| PrintError::config("print job requires an image"))?;
                render_print(image, &self.config)
            }
            JobAction::Feed { lines } => {
                let mut builder = EscPosBuilder::new();
                builder.feed(lines);
                Ok(RenderedJob::single(builder.build()))
            }
            JobAction::Cut => {
                let mut builder = EscPosBuilder::new();
                builder.cut(self.config.cut_mode);
                Ok(RenderedJob::single(builder.build()))
            }
        }
    }
}

fn render_print(image: &RasterImage, config: &DeviceConfig) -> PrintResult<RenderedJob> {
    let resized = raster::resize_to_width(image, config.width_px)?;
    let bitmap = raster::threshold(&resized, config.darkness);

    if let Some(max) = config.max_width_px {
        if bitmap.width() > max {
            return Err(PrintError::job(format!(
                "Raster width {} dots exceeds the {} maximum of {} dots",
                bitmap.width(),
                config.profile,
                max
            )));
        }
    }

    let mut builder = EscPosBuilder::new();
    builder.raster(&bitmap)?;

    let mut chunks = vec![builder.build()];
    if config.cut_mode != CutMode::None {
        chunks.push(escpos::cut(config.cut_mode));
    }

    Ok(RenderedJob {
        chunks,
        raster_width: Some(bitmap.width()),
    })
}

/// Command stream for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedJob {
    pub chunks: Vec<Vec<u8>>,
    /// Width of the encoded raster in dots, for the media width hint
    pub raster_width: Option<u32>,
}

impl RenderedJob {
    fn single(chunk: Vec<u8>) -> Self {
        Self {
            chunks: vec![chunk],
            raster_width: None,
        }
    }

    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn concat(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Successful job outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub action: JobAction,
    pub backend: &'static str,
    pub bytes_sent: u64,
}

//! ESC/POS command builder
//!
//! Only the subset the pipeline needs: initialize, raster bit image
//! (`GS v 0`), feed and cut.
//!
//! ## Raster layout
//!
//! ```text
//! 1D 76 30 00  xL xH  yL yH  d1 ... dk
//! └─ GS v 0 m ┘ └width┘ └height┘ └ k = width_bytes * height ┘
//! ```
//!
//! Each row is padded to whole bytes with white dots. Bit 7 of each byte is
//! the leftmost dot, and a set bit prints black.

use tracing::instrument;

use crate::config::CutMode;
use crate::error::{PrintError, PrintResult};
use crate::raster::MonoBitmap;

pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;

/// ESC @ - initialize printer
pub const INIT: [u8; 2] = [ESC, b'@'];

/// GS v 0 m - print raster bit image, normal density
pub const RASTER_OPCODE: [u8; 4] = [GS, b'v', b'0', 0x00];

/// GS V m n - feed and cut, full (m = 65) or partial (m = 66)
const CUT_FULL: u8 = 0x41;
const CUT_PARTIAL: u8 = 0x42;

/// Lines fed by a bare Feed job
pub const DEFAULT_FEED_LINES: u8 = 3;

/// ESC d n - print buffer and feed n lines
pub fn feed(lines: u8) -> Vec<u8> {
    vec![ESC, b'd', lines]
}

/// GS V m 0 for the given mode; empty when the mode is `None`
pub fn cut(mode: CutMode) -> Vec<u8> {
    match mode {
        CutMode::Full => vec![GS, b'V', CUT_FULL, 0],
        CutMode::Partial => vec![GS, b'V', CUT_PARTIAL, 0],
        CutMode::None => Vec::new(),
    }
}

/// Encode a bitmap as a `GS v 0` raster command.
///
/// Output depends only on the bitmap, so identical input always yields
/// identical bytes.
#[instrument(skip(bitmap), fields(width = bitmap.width(), height = bitmap.height()))]
pub fn encode_raster_command(bitmap: &MonoBitmap) -> PrintResult<Vec<u8>> {
    if bitmap.is_empty() {
        return Err(PrintError::job("empty image"));
    }

    let width_bytes = u16::try_from(bitmap.width_bytes()).map_err(|_| {
        PrintError::job(format!(
            "Raster width {} dots does not fit the command header",
            bitmap.width()
        ))
    })?;
    let height = u16::try_from(bitmap.height()).map_err(|_| {
        PrintError::job(format!(
            "Raster height {} dots does not fit the command header; split the image",
            bitmap.height()
        ))
    })?;

    let mut cmd = Vec::with_capacity(8 + width_bytes as usize * height as usize);
    cmd.extend_from_slice(&RASTER_OPCODE);
    cmd.extend_from_slice(&width_bytes.to_le_bytes());
    cmd.extend_from_slice(&height.to_le_bytes());

    for y in 0..bitmap.height() {
        for x_byte in 0..width_bytes as u32 {
            let mut byte = 0u8;
            for bit in 0..8 {
                if bitmap.is_black(x_byte * 8 + bit, y) {
                    byte |= 0x80 >> bit;
                }
            }
            cmd.push(byte);
        }
    }

    Ok(cmd)
}

/// Inverse of [`encode_raster_command`], returning the padded bitmap
#[cfg(test)]
pub(crate) fn decode_raster_command(cmd: &[u8]) -> PrintResult<MonoBitmap> {
    if cmd.len() < 8 || cmd[..4] != RASTER_OPCODE {
        return Err(PrintError::job("not a GS v 0 raster command"));
    }
    let width_bytes = u16::from_le_bytes([cmd[4], cmd[5]]) as u32;
    let height = u16::from_le_bytes([cmd[6], cmd[7]]) as u32;
    let data = &cmd[8..];
    if data.len() != (width_bytes * height) as usize {
        return Err(PrintError::job("raster payload length does not match header"));
    }

    MonoBitmap::from_fn(width_bytes * 8, height, |x, y| {
        let byte = data[(y * width_bytes + x / 8) as usize];
        byte & (0x80 >> (x % 8)) != 0
    })
}

/// ESC/POS command builder
///
/// Starts with `ESC @` so every buffer leaves the printer in a known state.
pub struct EscPosBuilder {
    buf: Vec<u8>,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(&INIT);
        Self { buf }
    }

    /// Append a raster image
    pub fn raster(&mut self, bitmap: &MonoBitmap) -> PrintResult<&mut Self> {
        let cmd = encode_raster_command(bitmap)?;
        self.buf.extend_from_slice(&cmd);
        Ok(self)
    }

    /// Feed n lines
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&feed(lines));
        self
    }

    /// Cut paper (no-op for `CutMode::None`)
    pub fn cut(&mut self, mode: CutMode) -> &mut Self {
        self.buf.extend_from_slice(&cut(mode));
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn checkerboard(width: u32, height: u32) -> MonoBitmap {
        MonoBitmap::from_fn(width, height, |x, y| (x + y) % 2 == 0).unwrap()
    }

    #[test]
    fn test_checkerboard_layout() {
        let cmd = encode_raster_command(&checkerboard(16, 8)).unwrap();

        assert_eq!(&cmd[..4], &[0x1D, 0x76, 0x30, 0x00]);
        // width_bytes = 2, height = 8, little-endian
        assert_eq!(&cmd[4..8], &[2, 0, 8, 0]);
        assert_eq!(cmd.len(), 8 + 16);
        for (row, pair) in cmd[8..].chunks(2).enumerate() {
            let expected = if row % 2 == 0 { 0xAA } else { 0x55 };
            assert_eq!(pair, &[expected, expected]);
        }
    }

    #[test]
    fn test_padding_is_white() {
        let all_black = MonoBitmap::from_fn(10, 1, |_, _| true).unwrap();
        let cmd = encode_raster_command(&all_black).unwrap();
        assert_eq!(&cmd[4..8], &[2, 0, 1, 0]);
        assert_eq!(&cmd[8..], &[0xFF, 0xC0]);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let bmp = MonoBitmap::from_fn(37, 11, |x, y| (x * y) % 3 == 0).unwrap();
        let first = encode_raster_command(&bmp).unwrap();
        for _ in 0..5 {
            assert_eq!(encode_raster_command(&bmp).unwrap(), first);
        }
    }

    #[test]
    fn test_decode_restores_padded_bitmap() {
        for &(w, h) in &[(1, 1), (8, 3), (13, 5), (16, 8), (61, 2)] {
            let bmp = MonoBitmap::from_fn(w, h, |x, y| (x * 3 + y) % 5 < 2).unwrap();
            let decoded = decode_raster_command(&encode_raster_command(&bmp).unwrap()).unwrap();
            assert_eq!(decoded, bmp.padded());
        }
    }

    #[test]
    fn test_empty_bitmap_rejected() {
        let empty = MonoBitmap::new(0, 4, Vec::new()).unwrap();
        let err = encode_raster_command(&empty).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Job);
        assert_eq!(err.message(), "empty image");
    }

    #[test]
    fn test_height_beyond_header_rejected() {
        let tall = MonoBitmap::from_fn(1, u16::MAX as u32 + 1, |_, _| false).unwrap();
        let err = encode_raster_command(&tall).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Job);
    }

    #[test]
    fn test_feed_and_cut_bytes() {
        assert_eq!(feed(3), vec![0x1B, 0x64, 3]);
        assert_eq!(cut(CutMode::Full), vec![0x1D, 0x56, 0x41, 0]);
        assert_eq!(cut(CutMode::Partial), vec![0x1D, 0x56, 0x42, 0]);
        assert!(cut(CutMode::None).is_empty());
    }

    #[test]
    fn test_builder_starts_with_init() {
        let mut b = EscPosBuilder::new();
        b.feed(2).cut(CutMode::Partial);
        let data = b.build();
        assert_eq!(data, vec![0x1B, 0x40, 0x1B, 0x64, 2, 0x1D, 0x56, 0x42, 0]);
    }

    #[test]
    fn test_builder_raster() {
        let mut b = EscPosBuilder::new();
        b.raster(&checkerboard(16, 8)).unwrap();
        assert_eq!(b.build().len(), 2 + 8 + 16);
    }
}

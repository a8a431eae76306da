//! Grayscale rasters and the darkness thresholder
//!
//! The pipeline works on 8-bit grayscale. [`resize_to_width`] fits an image to
//! the printer's dot width and [`threshold`] turns it into a [`MonoBitmap`]
//! with a fixed global cutoff: a pixel prints white iff its value is strictly
//! greater than the darkness setting. No dithering, so the output is exact and
//! reproducible.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use tracing::debug;

use crate::error::{PrintError, PrintResult};

/// Upper bound on `width * height` for any raster the pipeline will touch
pub const MAX_PIXELS: u64 = 1 << 25;

/// Widest target the raster header can describe (16-bit width in bytes)
pub const MAX_TARGET_WIDTH: u32 = u16::MAX as u32 * 8;

/// Row-major 8-bit grayscale image (0 = black, 255 = white)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap a grayscale buffer. The buffer must hold exactly `width * height` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> PrintResult<Self> {
        check_pixel_budget(width, height)?;
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(PrintError::job(format!(
                "Pixel buffer holds {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Image of a single gray value
    pub fn filled(width: u32, height: u32, value: u8) -> PrintResult<Self> {
        check_pixel_budget(width, height)?;
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    /// Build an image by evaluating `f(x, y)` for every pixel
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> PrintResult<Self> {
        check_pixel_budget(width, height)?;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self::new(width, height, pixels)
    }

    /// Convert RGBA8 data, compositing transparency over white paper
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> PrintResult<Self> {
        check_pixel_budget(width, height)?;
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(PrintError::job(format!(
                "RGBA buffer holds {} bytes, expected {} for {}x{}",
                rgba.len(),
                expected,
                width,
                height
            )));
        }

        let pixels = rgba
            .chunks_exact(4)
            .map(|px| composite_over_white(px[0], px[1], px[2], px[3]))
            .collect();
        Self::new(width, height, pixels)
    }

    /// Convert a decoded image of any color type
    pub fn from_dynamic(img: &DynamicImage) -> PrintResult<Self> {
        check_pixel_budget(img.width(), img.height())?;
        let rgba = img.to_rgba8();
        Self::from_rgba(rgba.width(), rgba.height(), rgba.as_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// One-bit image; `true` is a printed (black) dot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoBitmap {
    width: u32,
    height: u32,
    dots: Vec<bool>,
}

impl MonoBitmap {
    pub fn new(width: u32, height: u32, dots: Vec<bool>) -> PrintResult<Self> {
        check_pixel_budget(width, height)?;
        let expected = width as usize * height as usize;
        if dots.len() != expected {
            return Err(PrintError::job(format!(
                "Bitmap holds {} dots, expected {} for {}x{}",
                dots.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            dots,
        })
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> PrintResult<Self> {
        check_pixel_budget(width, height)?;
        let mut dots = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                dots.push(f(x, y));
            }
        }
        Self::new(width, height, dots)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Row width once padded to whole bytes
    pub fn width_bytes(&self) -> u32 {
        self.width.div_ceil(8)
    }

    /// Whether the dot at (x, y) is black. Out-of-range dots read as white.
    pub fn is_black(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.dots[y as usize * self.width as usize + x as usize]
    }

    pub fn black_count(&self) -> usize {
        self.dots.iter().filter(|&&d| d).count()
    }

    /// Copy widened to the next multiple of 8 with white padding columns
    pub fn padded(&self) -> MonoBitmap {
        let width = self.width_bytes() * 8;
        let mut dots = Vec::with_capacity(width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..width {
                dots.push(self.is_black(x, y));
            }
        }
        MonoBitmap {
            width,
            height: self.height,
            dots,
        }
    }
}

/// Resize to `target_width` dots, preserving aspect ratio.
///
/// A target of 0 keeps the source width, and a target equal to the source
/// width returns the image unchanged. The new height is
/// `floor(height * target / width)`, never less than one row.
pub fn resize_to_width(image: &RasterImage, target_width: u32) -> PrintResult<RasterImage> {
    if image.is_empty() {
        return Err(PrintError::job("empty image"));
    }

    let target = if target_width == 0 {
        image.width
    } else {
        target_width
    };
    if target > MAX_TARGET_WIDTH {
        return Err(PrintError::config(format!(
            "Target width {} exceeds the largest raster width ({})",
            target, MAX_TARGET_WIDTH
        )));
    }
    if target == image.width {
        return Ok(image.clone());
    }

    let height = (image.height as u64 * target as u64 / image.width as u64).max(1);
    let height = u32::try_from(height)
        .map_err(|_| PrintError::job(format!("Resized height {} is out of range", height)))?;
    check_pixel_budget(target, height)?;

    debug!(
        from_width = image.width,
        from_height = image.height,
        to_width = target,
        to_height = height,
        "resizing raster"
    );

    let source = GrayImage::from_raw(image.width, image.height, image.pixels.clone())
        .ok_or_else(|| PrintError::job("Pixel buffer does not match image dimensions"))?;
    let resized = imageops::resize(&source, target, height, FilterType::Lanczos3);

    RasterImage::new(target, height, resized.into_raw())
}

/// Binarize with a fixed cutoff: white iff `value > darkness`.
pub fn threshold(image: &RasterImage, darkness: u8) -> MonoBitmap {
    MonoBitmap {
        width: image.width,
        height: image.height,
        dots: image.pixels.iter().map(|&v| v <= darkness).collect(),
    }
}

fn check_pixel_budget(width: u32, height: u32) -> PrintResult<()> {
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(PrintError::job(format!(
            "Image {}x{} exceeds the {} pixel limit",
            width, height, MAX_PIXELS
        )));
    }
    Ok(())
}

/// ITU-R 601 luma, blended with white by alpha (integer math, deterministic)
fn composite_over_white(r: u8, g: u8, b: u8, a: u8) -> u8 {
    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
    let a = a as u32;
    ((luma * a + 255 * (255 - a) + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn gradient(width: u32, height: u32) -> RasterImage {
        RasterImage::from_fn(width, height, |x, y| ((x * 7 + y * 13) % 256) as u8).unwrap()
    }

    #[test]
    fn test_buffer_length_checked() {
        let err = RasterImage::new(4, 4, vec![0; 15]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Job);
    }

    #[test]
    fn test_pixel_cap() {
        let err = RasterImage::filled(1 << 13, 1 << 13, 255).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Job);
    }

    #[test]
    fn test_resize_same_width_is_noop() {
        let img = gradient(40, 10);
        assert_eq!(resize_to_width(&img, 40).unwrap(), img);
    }

    #[test]
    fn test_resize_zero_keeps_source_width() {
        let img = gradient(33, 17);
        assert_eq!(resize_to_width(&img, 0).unwrap(), img);
    }

    #[test]
    fn test_resize_preserves_aspect() {
        for &(w, h) in &[(100, 50), (33, 10), (640, 480), (7, 30), (576, 1)] {
            let img = gradient(w, h);
            for &target in &[1u32, 8, 37, 384, 576] {
                let out = resize_to_width(&img, target).unwrap();
                assert_eq!(out.width(), target);
                let exact = h as f64 * target as f64 / w as f64;
                assert!(
                    (out.height() as f64 - exact).abs() <= 1.0,
                    "{}x{} -> {}: height {} vs {}",
                    w,
                    h,
                    target,
                    out.height(),
                    exact
                );
                assert!(out.height() >= 1);
            }
        }
    }

    #[test]
    fn test_resize_empty_image() {
        let img = RasterImage::new(0, 10, Vec::new()).unwrap();
        let err = resize_to_width(&img, 384).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Job);
        assert_eq!(err.message(), "empty image");
    }

    #[test]
    fn test_resize_target_out_of_range() {
        let img = gradient(8, 8);
        let err = resize_to_width(&img, MAX_TARGET_WIDTH + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let img = RasterImage::filled(100, 40, 255).unwrap();
        let out = resize_to_width(&img, 50).unwrap();
        assert_eq!(out.height(), 20);
        assert!(out.pixels().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_threshold_boundary() {
        let img = RasterImage::new(4, 1, vec![0, 127, 128, 255]).unwrap();
        let bmp = threshold(&img, 127);
        // 127 is not strictly greater than the cutoff, so it prints
        assert!(bmp.is_black(0, 0));
        assert!(bmp.is_black(1, 0));
        assert!(!bmp.is_black(2, 0));
        assert!(!bmp.is_black(3, 0));
    }

    #[test]
    fn test_threshold_zero_darkness_only_blacks_zero() {
        let img = RasterImage::new(4, 1, vec![0, 1, 200, 0]).unwrap();
        let bmp = threshold(&img, 0);
        assert_eq!(bmp.black_count(), 2);
        assert!(bmp.is_black(0, 0) && bmp.is_black(3, 0));
    }

    #[test]
    fn test_threshold_monotonic() {
        let img = gradient(64, 16);
        let mut previous = 0;
        for darkness in 0..=255u8 {
            let black = threshold(&img, darkness).black_count();
            assert!(black >= previous, "darkness {} lost black dots", darkness);
            previous = black;
        }
        assert_eq!(previous, 64 * 16);
    }

    #[test]
    fn test_transparent_is_white() {
        let rgba = [0, 0, 0, 0, 0, 0, 0, 255, 255, 255, 255, 255];
        let img = RasterImage::from_rgba(3, 1, &rgba).unwrap();
        assert_eq!(img.pixels(), &[255, 0, 255]);
    }

    #[test]
    fn test_from_dynamic() {
        let mut gray = GrayImage::new(3, 2);
        gray.put_pixel(1, 1, image::Luma([42]));
        let img = RasterImage::from_dynamic(&DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!(img.width(), 3);
        assert_eq!(img.height(), 2);
        assert_eq!(img.get(1, 1), Some(42));
        assert_eq!(img.get(0, 0), Some(0));
        assert_eq!(img.get(3, 0), None);
    }

    #[test]
    fn test_padded_adds_white_columns() {
        let bmp = MonoBitmap::from_fn(10, 2, |_, _| true).unwrap();
        let padded = bmp.padded();
        assert_eq!(padded.width(), 16);
        assert_eq!(padded.black_count(), 20);
        assert!(!padded.is_black(10, 0));
        assert!(!padded.is_black(15, 1));
    }
}

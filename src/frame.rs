//! Frame model and the temperature-to-intensity mapping.
//!
//! - `RawFrame`: what a camera delivers. Temperature samples (Celsius, row-major)
//!   plus the visible-light image. Owned by the processing call that receives it.
//! - `RenderedFrame`: the display-ready pair. Immutable once built.
//! - `FrameProcessor`: pure transformation from the former to the latter.
//!
//! Temperatures are clamped into a `TemperatureRange` and scaled linearly into
//! an 8-bit grayscale image. The visible image is decoded independently; its
//! dimensions need not match the thermal grid.

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};

use crate::error::PipelineError;

/// Lower clamp bound in Celsius.
pub const DEFAULT_MIN_TEMP_C: f64 = 30.0;
/// Upper clamp bound in Celsius.
pub const DEFAULT_MAX_TEMP_C: f64 = 45.0;

/// Width of the temperature rectangle requested from the camera.
pub const DEFAULT_THERMAL_WIDTH: u32 = 480;
/// Height of the temperature rectangle requested from the camera.
pub const DEFAULT_THERMAL_HEIGHT: u32 = 640;

// ----------------------------------------------------------------------------
// TemperatureRange
// ----------------------------------------------------------------------------

/// Clamp bounds of the intensity mapping. These belong to the mapping, not to
/// any particular frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemperatureRange {
    min_c: f64,
    max_c: f64,
}

impl TemperatureRange {
    pub fn new(min_c: f64, max_c: f64) -> Result<Self> {
        if !min_c.is_finite() || !max_c.is_finite() {
            return Err(anyhow!("temperature bounds must be finite"));
        }
        if min_c >= max_c {
            return Err(anyhow!(
                "temperature range min ({}) must be below max ({})",
                min_c,
                max_c
            ));
        }
        Ok(Self { min_c, max_c })
    }

    pub fn min_c(&self) -> f64 {
        self.min_c
    }

    pub fn max_c(&self) -> f64 {
        self.max_c
    }

    fn span(&self) -> f64 {
        self.max_c - self.min_c
    }
}

impl Default for TemperatureRange {
    fn default() -> Self {
        Self {
            min_c: DEFAULT_MIN_TEMP_C,
            max_c: DEFAULT_MAX_TEMP_C,
        }
    }
}

/// Map one temperature sample to an 8-bit intensity.
///
/// Samples at or below `min` map to 0, at or above `max` to 255. NaN maps to 0.
pub fn scale_temperature(sample: f64, range: TemperatureRange) -> u8 {
    if sample.is_nan() {
        return 0;
    }
    let clamped = sample.clamp(range.min_c, range.max_c);
    let scaled = ((clamped - range.min_c) * 255.0 / range.span()).round();
    scaled.min(255.0) as u8
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// Visible-light image as delivered by the camera.
#[derive(Debug)]
pub enum VisibleImage {
    /// Encoded image bytes (JPEG, or any format the `image` crate was built with).
    Encoded(Vec<u8>),
    /// Already-decoded packed RGB8 pixels.
    Rgb {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

/// One frame as delivered by a camera.
///
/// Deliberately not `Clone`: the frame is moved into `FrameProcessor::process`
/// and dropped there.
#[derive(Debug)]
pub struct RawFrame {
    temperatures: Vec<f64>,
    width: u32,
    height: u32,
    visible: VisibleImage,
    sequence: u64,
}

impl RawFrame {
    /// `temperatures` must already be in Celsius, row-major, `width * height` long.
    /// The length is checked by the processor, not here.
    pub fn new(temperatures: Vec<f64>, width: u32, height: u32, visible: VisibleImage) -> Self {
        Self {
            temperatures,
            width,
            height,
            visible,
            sequence: 0,
        }
    }

    /// Source-assigned frame number, carried through to the rendered frame.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn temperatures(&self) -> &[f64] {
        &self.temperatures
    }

    pub fn visible(&self) -> &VisibleImage {
        &self.visible
    }
}

// ----------------------------------------------------------------------------
// RenderedFrame
// ----------------------------------------------------------------------------

/// Observed statistics of the raw samples of one frame (finite samples only).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemperatureSummary {
    pub min_c: f64,
    pub max_c: f64,
    pub mean_c: f64,
}

impl TemperatureSummary {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min_c = f64::INFINITY;
        let mut max_c = f64::NEG_INFINITY;
        for &t in samples.iter().filter(|t| t.is_finite()) {
            count += 1;
            sum += t;
            min_c = min_c.min(t);
            max_c = max_c.max(t);
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            min_c,
            max_c,
            mean_c: sum / count as f64,
        })
    }
}

/// Display-ready thermal/visible pair.
#[derive(Clone, Debug)]
pub struct RenderedFrame {
    thermal: GrayImage,
    visible: RgbImage,
    range: TemperatureRange,
    summary: Option<TemperatureSummary>,
    sequence: u64,
}

impl RenderedFrame {
    /// Scaled thermal intensities, one byte per sample, row-major.
    pub fn thermal_image(&self) -> &GrayImage {
        &self.thermal
    }

    pub fn visible_image(&self) -> &RgbImage {
        &self.visible
    }

    /// Lower clamp bound used for this frame.
    pub fn min_temp(&self) -> f64 {
        self.range.min_c
    }

    /// Upper clamp bound used for this frame.
    pub fn max_temp(&self) -> f64 {
        self.range.max_c
    }

    pub fn range(&self) -> TemperatureRange {
        self.range
    }

    pub fn summary(&self) -> Option<TemperatureSummary> {
        self.summary
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

// ----------------------------------------------------------------------------
// FrameProcessor
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameProcessor {
    range: TemperatureRange,
}

impl FrameProcessor {
    pub fn new(range: TemperatureRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> TemperatureRange {
        self.range
    }

    /// Turn a raw frame into a rendered one.
    ///
    /// Fails with `MalformedFrame` when the sample count is not `width * height`
    /// and with `DecodeError` when the visible image cannot be decoded.
    pub fn process(&self, raw: RawFrame) -> Result<RenderedFrame, PipelineError> {
        let RawFrame {
            temperatures,
            width,
            height,
            visible,
            sequence,
        } = raw;

        let expected = width as usize * height as usize;
        if temperatures.len() != expected {
            return Err(PipelineError::MalformedFrame {
                expected,
                actual: temperatures.len(),
            });
        }

        let intensities: Vec<u8> = temperatures
            .iter()
            .map(|&t| scale_temperature(t, self.range))
            .collect();
        let thermal = GrayImage::from_raw(width, height, intensities).ok_or(
            PipelineError::MalformedFrame {
                expected,
                actual: temperatures.len(),
            },
        )?;

        let visible = decode_visible(visible)?;
        let summary = TemperatureSummary::from_samples(&temperatures);

        log::debug!(
            "frame #{} rendered: thermal {}x{}, visible {}x{}",
            sequence,
            width,
            height,
            visible.width(),
            visible.height()
        );

        Ok(RenderedFrame {
            thermal,
            visible,
            range: self.range,
            summary,
            sequence,
        })
    }
}

fn decode_visible(visible: VisibleImage) -> Result<RgbImage, PipelineError> {
    match visible {
        VisibleImage::Encoded(bytes) => image::load_from_memory(&bytes)
            .map(|decoded| decoded.into_rgb8())
            .map_err(|e| PipelineError::DecodeError(e.to_string())),
        VisibleImage::Rgb {
            width,
            height,
            pixels,
        } => {
            let len = pixels.len();
            RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
                PipelineError::DecodeError(format!(
                    "rgb buffer of {} bytes does not fit {}x{}",
                    len, width, height
                ))
            })
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgb;

    fn rgb_visible(width: u32, height: u32) -> VisibleImage {
        VisibleImage::Rgb {
            width,
            height,
            pixels: vec![128u8; (width * height * 3) as usize],
        }
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 10]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&img)
            .expect("encode jpeg");
        out
    }

    #[test]
    fn samples_below_range_scale_to_zero() {
        let range = TemperatureRange::default();
        for t in [-40.0, 0.0, 29.99, 30.0] {
            assert_eq!(scale_temperature(t, range), 0, "t={}", t);
        }
    }

    #[test]
    fn samples_above_range_scale_to_full() {
        let range = TemperatureRange::default();
        for t in [45.0, 45.01, 100.0, f64::INFINITY] {
            assert_eq!(scale_temperature(t, range), 255, "t={}", t);
        }
    }

    #[test]
    fn mapping_is_monotonic_inside_range() {
        let range = TemperatureRange::default();
        let mut previous = 0u8;
        let mut t = 30.0;
        while t <= 45.0 {
            let scaled = scale_temperature(t, range);
            assert!(scaled >= previous, "not monotonic at {}", t);
            previous = scaled;
            t += 0.01;
        }
    }

    #[test]
    fn nan_maps_to_zero() {
        assert_eq!(scale_temperature(f64::NAN, TemperatureRange::default()), 0);
    }

    #[test]
    fn uniform_body_temperature_scales_to_128() {
        let processor = FrameProcessor::default();
        let raw = RawFrame::new(vec![37.5; 12], 4, 3, rgb_visible(2, 2));
        let rendered = processor.process(raw).expect("process");

        assert_eq!(rendered.thermal_image().as_raw().len(), 12);
        assert!(rendered.thermal_image().as_raw().iter().all(|&v| v == 128));
        assert_eq!(rendered.min_temp(), 30.0);
        assert_eq!(rendered.max_temp(), 45.0);
    }

    #[test]
    fn thermal_image_is_row_major() {
        let processor = FrameProcessor::default();
        // 2x2: first row cold, second row hot.
        let raw = RawFrame::new(vec![20.0, 20.0, 50.0, 50.0], 2, 2, rgb_visible(1, 1));
        let rendered = processor.process(raw).expect("process");
        let thermal = rendered.thermal_image();
        assert_eq!(thermal.get_pixel(0, 0).0[0], 0);
        assert_eq!(thermal.get_pixel(1, 0).0[0], 0);
        assert_eq!(thermal.get_pixel(0, 1).0[0], 255);
        assert_eq!(thermal.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn sample_count_mismatch_is_malformed() {
        let processor = FrameProcessor::default();
        let raw = RawFrame::new(vec![31.0; 5], 2, 3, rgb_visible(1, 1));
        let err = processor.process(raw).unwrap_err();
        assert_eq!(
            err,
            PipelineError::MalformedFrame {
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn undecodable_visible_image_is_decode_error() {
        let processor = FrameProcessor::default();
        let raw = RawFrame::new(
            vec![31.0; 4],
            2,
            2,
            VisibleImage::Encoded(b"definitely not a jpeg".to_vec()),
        );
        assert!(matches!(
            processor.process(raw),
            Err(PipelineError::DecodeError(_))
        ));
    }

    #[test]
    fn short_rgb_buffer_is_decode_error() {
        let processor = FrameProcessor::default();
        let raw = RawFrame::new(
            vec![31.0; 4],
            2,
            2,
            VisibleImage::Rgb {
                width: 4,
                height: 4,
                pixels: vec![0; 10],
            },
        );
        assert!(matches!(
            processor.process(raw),
            Err(PipelineError::DecodeError(_))
        ));
    }

    #[test]
    fn visible_dimensions_are_independent_of_thermal_grid() {
        let processor = FrameProcessor::default();
        let raw = RawFrame::new(vec![35.0; 6], 3, 2, VisibleImage::Encoded(jpeg_bytes(16, 8)))
            .with_sequence(7);
        let rendered = processor.process(raw).expect("process");
        assert_eq!(rendered.thermal_image().dimensions(), (3, 2));
        assert_eq!(rendered.visible_image().dimensions(), (16, 8));
        assert_eq!(rendered.sequence(), 7);
    }

    #[test]
    fn configured_range_is_reported_on_frame() {
        let range = TemperatureRange::new(20.0, 40.0).expect("range");
        let processor = FrameProcessor::new(range);
        let raw = RawFrame::new(vec![30.0; 1], 1, 1, rgb_visible(1, 1));
        let rendered = processor.process(raw).expect("process");
        assert_eq!(rendered.thermal_image().as_raw()[0], 128);
        assert_eq!(rendered.min_temp(), 20.0);
        assert_eq!(rendered.max_temp(), 40.0);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(TemperatureRange::new(45.0, 30.0).is_err());
        assert!(TemperatureRange::new(30.0, 30.0).is_err());
        assert!(TemperatureRange::new(f64::NAN, 30.0).is_err());
    }

    #[test]
    fn summary_ignores_non_finite_samples() {
        let summary =
            TemperatureSummary::from_samples(&[30.0, f64::NAN, 40.0, f64::INFINITY]).expect("sum");
        assert_eq!(summary.min_c, 30.0);
        assert_eq!(summary.max_c, 40.0);
        assert_eq!(summary.mean_c, 35.0);
        assert!(TemperatureSummary::from_samples(&[f64::NAN]).is_none());
    }
}

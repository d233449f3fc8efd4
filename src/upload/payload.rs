//! Upload sample and its multipart/form-data encoding.
//!
//! Parts, in order:
//! - `device_id` (text)
//! - `min_temperature`, `max_temperature` (integer text, rounded Celsius)
//! - `photo_image` (`photoImage.jpg`, JPEG of the visible image)
//! - `thermal_image` (`thermalImage.jpg`, JPEG of the grayscale thermal image)

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GrayImage, RgbImage};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::PipelineError;
use crate::frame::RenderedFrame;

/// Device identifier sent with every upload.
pub const DEFAULT_DEVICE_ID: &str = "0001";

pub const DEVICE_ID_PART: &str = "device_id";
pub const MIN_TEMPERATURE_PART: &str = "min_temperature";
pub const MAX_TEMPERATURE_PART: &str = "max_temperature";
pub const PHOTO_IMAGE_PART: &str = "photo_image";
pub const THERMAL_IMAGE_PART: &str = "thermal_image";

const PHOTO_FILENAME: &str = "photoImage.jpg";
const THERMAL_FILENAME: &str = "thermalImage.jpg";
const JPEG_CONTENT_TYPE: &str = "image/jpeg";
const JPEG_QUALITY: u8 = 100;

/// Snapshot of one displayed frame, taken when the upload timer fires.
///
/// Owns copies of both images so later frames never alter what is sent.
#[derive(Clone, Debug)]
pub struct UploadSample {
    device_id: String,
    photo: RgbImage,
    thermal: GrayImage,
    min_temperature: i64,
    max_temperature: i64,
    sequence: u64,
}

impl UploadSample {
    pub fn capture(frame: &RenderedFrame, device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            photo: frame.visible_image().clone(),
            thermal: frame.thermal_image().clone(),
            min_temperature: frame.min_temp().round() as i64,
            max_temperature: frame.max_temp().round() as i64,
            sequence: frame.sequence(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn min_temperature(&self) -> i64 {
        self.min_temperature
    }

    pub fn max_temperature(&self) -> i64 {
        self.max_temperature
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// JPEG-encode both images and build the multipart body.
    pub fn encode(&self) -> Result<MultipartPayload, PipelineError> {
        let photo = encode_jpeg(
            self.photo.as_raw(),
            self.photo.width(),
            self.photo.height(),
            ExtendedColorType::Rgb8,
        )?;
        let thermal = encode_jpeg(
            self.thermal.as_raw(),
            self.thermal.width(),
            self.thermal.height(),
            ExtendedColorType::L8,
        )?;

        let mut builder = MultipartBuilder::new();
        builder.text(DEVICE_ID_PART, &self.device_id);
        builder.text(MIN_TEMPERATURE_PART, &self.min_temperature.to_string());
        builder.text(MAX_TEMPERATURE_PART, &self.max_temperature.to_string());
        builder.file(PHOTO_IMAGE_PART, PHOTO_FILENAME, JPEG_CONTENT_TYPE, &photo);
        builder.file(THERMAL_IMAGE_PART, THERMAL_FILENAME, JPEG_CONTENT_TYPE, &thermal);
        Ok(builder.finish())
    }
}

fn encode_jpeg(
    pixels: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(pixels, width, height, color)
        .map_err(|err| PipelineError::EncodeError(err.to_string()))?;
    Ok(out)
}

/// Encoded multipart/form-data request body.
#[derive(Clone, Debug)]
pub struct MultipartPayload {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartPayload {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the `Content-Type` request header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_boundary(format!("thermal-relay-{}", token))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    fn open_part(&mut self, disposition: &str) {
        self.body.extend_from_slice(b"--");
        self.body.extend_from_slice(self.boundary.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self.body.extend_from_slice(b"Content-Disposition: form-data; ");
        self.body.extend_from_slice(disposition.as_bytes());
        self.body.extend_from_slice(b"\r\n");
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.open_part(&format!("name=\"{}\"", name));
        self.body.extend_from_slice(b"\r\n");
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(&mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> &mut Self {
        self.open_part(&format!("name=\"{}\"; filename=\"{}\"", name, filename));
        self.body.extend_from_slice(b"Content-Type: ");
        self.body.extend_from_slice(content_type.as_bytes());
        self.body.extend_from_slice(b"\r\n\r\n");
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> MultipartPayload {
        self.body.extend_from_slice(b"--");
        self.body.extend_from_slice(self.boundary.as_bytes());
        self.body.extend_from_slice(b"--\r\n");
        MultipartPayload {
            boundary: self.boundary,
            body: self.body,
        }
    }
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

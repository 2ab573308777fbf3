//! Upload compression.
//!
//! Shrinks a captured image until it fits a byte budget: downscale the
//! longer edge, then re-encode as JPEG at falling quality until it fits or
//! the quality floor is reached.

use crate::config::CompressionConfig;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, instrument};

const THUMBNAIL_QUALITY: u8 = 80;

/// Errors that can occur during compression
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("Unsupported or malformed image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Output of a compression pass
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    /// Encoder quality used, `None` when the source was passed through
    pub quality: Option<u8>,
    pub content_type: &'static str,
}

impl CompressedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the budget was missed and the quality floor was hit
    pub fn hit_floor(&self, min_quality: u8) -> bool {
        self.quality == Some(min_quality)
    }
}

/// Byte-budget image compressor
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compress `source` to at most `budget_bytes`, best effort.
    ///
    /// A source that already fits is returned untouched. Otherwise the
    /// result is the first quality step that fits, or the floor quality if
    /// none does.
    #[instrument(skip(self, source), fields(source_bytes = source.len()))]
    pub fn compress(&self, source: Bytes) -> Result<CompressedImage, CompressError> {
        let budget = self.config.budget_bytes;
        let reader = ImageReader::new(Cursor::new(source.as_ref()))
            .with_guessed_format()
            .map_err(|e| CompressError::Decode(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| CompressError::Decode("unrecognised image container".to_string()))?;

        if source.len() <= budget {
            let (width, height) = reader
                .into_dimensions()
                .map_err(|e| CompressError::Decode(e.to_string()))?;
            debug!(width, height, "Source already within budget");
            return Ok(CompressedImage {
                bytes: source,
                width,
                height,
                quality: None,
                content_type: content_type(format),
            });
        }

        let started = Instant::now();
        let image = reader
            .decode()
            .map_err(|e| CompressError::Decode(e.to_string()))?;
        let image = self.downscale(image);
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let mut quality = self.config.start_quality.max(self.config.min_quality);
        let encoded = loop {
            let mut buffer = Vec::new();
            JpegEncoder::new_with_quality(&mut buffer, quality)
                .encode_image(&rgb)
                .map_err(|e| CompressError::Encode(e.to_string()))?;

            debug!(quality, size_bytes = buffer.len(), budget, "Encoded candidate");

            if buffer.len() <= budget || quality <= self.config.min_quality {
                break buffer;
            }
            quality = quality
                .saturating_sub(self.config.quality_step.max(1))
                .max(self.config.min_quality);
        };

        metrics::histogram!("darkroom.compress.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(CompressedImage {
            bytes: Bytes::from(encoded),
            width,
            height,
            quality: Some(quality),
            content_type: "image/jpeg",
        })
    }

    /// Small JPEG variant for gallery grids, longer edge at most `max_edge`
    pub fn thumbnail(&self, source: &[u8], max_edge: u32) -> Result<Bytes, CompressError> {
        let image = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| CompressError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| CompressError::Decode(e.to_string()))?;

        let thumb = image.thumbnail(max_edge, max_edge).to_rgb8();
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, THUMBNAIL_QUALITY)
            .encode_image(&thumb)
            .map_err(|e| CompressError::Encode(e.to_string()))?;

        Ok(Bytes::from(buffer))
    }

    /// Shrink so the longer edge is at most `max_edge`, keeping aspect ratio
    fn downscale(&self, image: DynamicImage) -> DynamicImage {
        let max_edge = self.config.max_edge;
        if image.width().max(image.height()) <= max_edge {
            return image;
        }

        let (width, height) = fit_within(image.width(), image.height(), max_edge);
        image.resize_exact(width, height, FilterType::Lanczos3)
    }
}

/// Dimensions scaled so the longer edge equals `max_edge`
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge {
        return (width, height);
    }

    let ratio = max_edge as f64 / longest as f64;
    let scaled = |edge: u32| ((edge as f64 * ratio).round() as u32).clamp(1, max_edge);
    (scaled(width), scaled(height))
}

fn content_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::WebP => "image/webp",
        _ => "application/octet-stream",
    }
}

//! Film filter engine.
//!
//! Applies one of the named presets to a decoded RGBA buffer. The same
//! entry point serves the cheap preview (downsampled first) and the
//! full-resolution export, so the two only differ in size and cost.

pub mod ops;
pub mod presets;

pub use presets::{FilterKind, FilterSpec, ToneParams, VignetteParams, FILM_35MM, VINTAGE};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::io::Cursor;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors that can occur while rendering a filtered image
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Grain noise source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrainSeed {
    /// Fresh noise on every render
    #[default]
    Random,
    /// Reproducible noise
    Fixed(u64),
}

impl GrainSeed {
    /// Stable seed for a photo so its export is bit-for-bit repeatable
    pub fn for_photo(photo_id: Uuid) -> Self {
        let (high, low) = photo_id.as_u64_pair();
        GrainSeed::Fixed(high ^ low)
    }

    fn rng(&self) -> StdRng {
        match self {
            GrainSeed::Random => StdRng::from_rng(&mut rand::rng()),
            GrainSeed::Fixed(seed) => StdRng::seed_from_u64(*seed),
        }
    }
}

/// Output size of a render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "size")]
pub enum Resolution {
    /// Downsampled so the longer edge is at most `max_edge`
    Preview { max_edge: u32 },
    /// Source resolution
    Full,
}

/// A rendered, encoded image
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub content_type: &'static str,
}

/// Stateless renderer for the film presets
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterEngine;

impl FilterEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `kind` to `image`, returning a buffer of identical dimensions.
    ///
    /// `FilterKind::None` returns an exact copy.
    pub fn apply(&self, image: &RgbaImage, kind: FilterKind, seed: GrainSeed) -> RgbaImage {
        match kind.spec() {
            None => image.clone(),
            Some(spec) => apply_spec(image, spec, seed),
        }
    }

    /// Resize for `resolution` if needed, then apply `kind`
    pub fn render(
        &self,
        image: &DynamicImage,
        kind: FilterKind,
        resolution: Resolution,
        seed: GrainSeed,
    ) -> RgbaImage {
        let source = match resolution {
            Resolution::Preview { max_edge }
                if image.width().max(image.height()) > max_edge =>
            {
                image.thumbnail(max_edge, max_edge).to_rgba8()
            }
            _ => image.to_rgba8(),
        };

        self.apply(&source, kind, seed)
    }

    /// Decode `encoded`, render it and re-encode as JPEG at `quality`
    pub fn render_encoded(
        &self,
        encoded: &[u8],
        kind: FilterKind,
        resolution: Resolution,
        seed: GrainSeed,
        quality: u8,
    ) -> Result<RenderedImage, FilterError> {
        let started = Instant::now();
        let image = decode(encoded)?;
        let rendered = self.render(&image, kind, resolution, seed);
        let (width, height) = rendered.dimensions();

        let rgb = DynamicImage::ImageRgba8(rendered).to_rgb8();
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .encode_image(&rgb)
            .map_err(|e| FilterError::Encode(e.to_string()))?;

        let elapsed = started.elapsed();
        metrics::histogram!("darkroom.render.duration_seconds").record(elapsed.as_secs_f64());
        debug!(
            filter = %kind,
            width,
            height,
            size_bytes = bytes.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Rendered filtered image"
        );

        Ok(RenderedImage {
            bytes,
            width,
            height,
            content_type: "image/jpeg",
        })
    }
}

/// Decode any supported container, sniffing the format from the bytes
pub fn decode(encoded: &[u8]) -> Result<DynamicImage, FilterError> {
    ImageReader::new(Cursor::new(encoded))
        .with_guessed_format()
        .map_err(|e| FilterError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| FilterError::Decode(e.to_string()))
}

fn apply_spec(image: &RgbaImage, spec: &FilterSpec, seed: GrainSeed) -> RgbaImage {
    let (width, height) = image.dimensions();
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;
    let grain_amplitude = spec.grain_intensity * 255.0;
    let mut rng = seed.rng();

    let mut output = RgbaImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;

        let toned = (spec.pixel_op)([r as f32, g as f32, b as f32]);

        let dx = x as f32 + 0.5 - center_x;
        let dy = y as f32 + 0.5 - center_y;
        let distance = (dx * dx + dy * dy).sqrt();
        let vignetted = ops::scale(toned, spec.vignette.factor(distance, width, height));

        let grained = if grain_amplitude > 0.0 {
            vignetted.map(|c| c + (rng.random::<f32>() - 0.5) * grain_amplitude)
        } else {
            vignetted
        };

        output.put_pixel(
            x,
            y,
            Rgba([
                ops::quantize(grained[0]),
                ops::quantize(grained[1]),
                ops::quantize(grained[2]),
                a,
            ]),
        );
    }

    output
}

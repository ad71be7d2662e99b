//! Intensity-patch feature extractor.
//!
//! Crops a detected face, resizes it to a canonical square, converts to
//! grayscale, equalizes the histogram and flattens the result row-major.
//! No learned model is involved: signatures are comparable pixel for pixel.

use crate::types::{BoundingBox, Signature};
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

/// Side length of the canonical face patch.
pub const CANONICAL_SIZE: u32 = 100;

/// Signature length produced by the default extractor.
pub const SIGNATURE_LEN: usize = (CANONICAL_SIZE * CANONICAL_SIZE) as usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("face box has non-positive size: {width}x{height}")]
    InvalidBox { width: i32, height: i32 },
    #[error("face box {bbox:?} lies outside the {image_width}x{image_height} image")]
    OutOfBounds {
        bbox: BoundingBox,
        image_width: u32,
        image_height: u32,
    },
}

/// Deterministic crop, resize, grayscale, equalize, flatten pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureExtractor {
    size: u32,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self {
            size: CANONICAL_SIZE,
        }
    }
}

impl FeatureExtractor {
    /// Extractor with a non-default canonical side length.
    ///
    /// Signatures from extractors of different sizes are not comparable.
    pub fn with_size(size: u32) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn signature_len(&self) -> usize {
        (self.size as usize) * (self.size as usize)
    }

    /// Produce the signature of the face inside `bbox`.
    pub fn extract(
        &self,
        image: &DynamicImage,
        bbox: &BoundingBox,
    ) -> Result<Signature, ExtractionError> {
        if !bbox.has_positive_size() {
            return Err(ExtractionError::InvalidBox {
                width: bbox.width,
                height: bbox.height,
            });
        }
        if !bbox.fits_within(image.width(), image.height()) {
            return Err(ExtractionError::OutOfBounds {
                bbox: *bbox,
                image_width: image.width(),
                image_height: image.height(),
            });
        }

        // Validated above: all four fields are non-negative.
        let crop = image.crop_imm(
            bbox.x as u32,
            bbox.y as u32,
            bbox.width as u32,
            bbox.height as u32,
        );
        let resized = crop.resize_exact(self.size, self.size, FilterType::Triangle);
        let mut gray = resized.to_luma8().into_raw();
        equalize_histogram(&mut gray);

        tracing::trace!(?bbox, size = self.size, "extracted face signature");

        Ok(Signature::new(gray.into_iter().map(f32::from).collect()))
    }
}

/// Global histogram equalization in place.
///
/// Maps each intensity through the normalized CDF so the output spans
/// 0–255. A patch holding a single intensity is left untouched.
pub fn equalize_histogram(gray: &mut [u8]) {
    if gray.is_empty() {
        return;
    }

    let mut hist = [0u32; 256];
    for &p in gray.iter() {
        hist[p as usize] += 1;
    }

    let total = gray.len() as u64;
    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (i, &count) in hist.iter().enumerate() {
        running += u64::from(count);
        cdf[i] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
    let denom = total - cdf_min;
    if denom == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let scaled = (cdf[i].saturating_sub(cdf_min)) as f64 * 255.0 / denom as f64;
        *entry = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}

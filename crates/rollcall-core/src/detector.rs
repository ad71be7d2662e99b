//! Face detector boundary.
//!
//! The engine never looks inside a detector: it hands over an image and gets
//! back zero or more boxes in that image's pixel coordinates.

use crate::types::BoundingBox;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[cfg(feature = "scrfd")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces candidate face regions for an image.
pub trait Detector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        (**self).detect(image)
    }
}

/// Treats the whole image as one face. Suited to pre-cropped portraits.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameDetector;

impl Detector for FullFrameDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox::full_frame(image.width(), image.height())])
    }
}

/// Returns the same caller-supplied boxes for every image.
#[derive(Debug, Clone, Default)]
pub struct FixedDetector {
    boxes: Vec<BoundingBox>,
}

impl FixedDetector {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }
}

impl Detector for FixedDetector {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.boxes.clone())
    }
}

/// Pick the face to act on: largest area, earliest on ties.
pub fn select_primary(boxes: &[BoundingBox]) -> Option<&BoundingBox> {
    let mut best: Option<&BoundingBox> = None;
    for candidate in boxes {
        match best {
            Some(current) if candidate.area() <= current.area() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Two signatures of different lengths were compared or combined.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("signature length mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Axis-aligned face region in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Box covering a whole `width` x `height` image.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(
            0,
            0,
            i32::try_from(width).unwrap_or(i32::MAX),
            i32::try_from(height).unwrap_or(i32::MAX),
        )
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width) * i64::from(self.height)
    }

    pub fn has_positive_size(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// True when the box lies entirely inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && i64::from(self.x) + i64::from(self.width) <= i64::from(width)
            && i64::from(self.y) + i64::from(self.height) <= i64::from(height)
    }
}

/// Fixed-length intensity signature of a face region.
///
/// Produced by the feature extractor as a flattened, equalized grayscale
/// patch. All signatures in a store share one length.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn check_len(&self, other: &Signature) -> Result<(), DimensionMismatch> {
        if self.len() != other.len() {
            return Err(DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(())
    }

    /// Cosine similarity remapped from [-1, 1] into [0, 1].
    ///
    /// A zero-magnitude signature is similar to nothing: the result is 0.
    /// Accumulates in f64 so the 10k-element dot products stay exact enough
    /// for self-similarity to land on 1.0.
    pub fn similarity(&self, other: &Signature) -> Result<f32, DimensionMismatch> {
        self.check_len(other)?;

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        let cosine = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
        Ok(((cosine + 1.0) / 2.0) as f32)
    }

    /// Element-wise arithmetic mean of two signatures.
    pub fn average(&self, other: &Signature) -> Result<Signature, DimensionMismatch> {
        self.check_len(other)?;
        let values = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a + b) / 2.0)
            .collect();
        Ok(Signature { values })
    }
}

/// A stored identity and its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub identity: String,
    pub signature: Signature,
}

/// Best candidate found for a probe signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity: String,
    /// Remapped cosine similarity in [0, 1].
    pub similarity: f32,
}

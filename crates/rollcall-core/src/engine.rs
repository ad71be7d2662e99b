//! Enrollment and recognition service.
//!
//! Orchestrates detector → extractor → store/matcher. The store sits behind
//! an `RwLock`: enroll and delete hold the write lock across the whole
//! read-modify-persist sequence, recognition holds the read lock.

use crate::detector::{select_primary, Detector, DetectorError};
use crate::extractor::{ExtractionError, FeatureExtractor};
use crate::matcher::{CosineMatcher, Matcher};
use crate::store::{SignatureStore, StoreError};
use crate::types::{BoundingBox, DimensionMismatch, MatchResult, Signature};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Minimum similarity for a positive recognition.
pub const DEFAULT_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("no faces are enrolled")]
    EmptyStore,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine lock poisoned")]
    LockPoisoned,
}

/// What an enrollment did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// The identity was new.
    Created,
    /// The identity existed; its signature is now the mean of old and new.
    Refined,
}

/// Face enrollment and recognition over one signature store.
pub struct FaceEngine<D> {
    detector: Mutex<D>,
    extractor: FeatureExtractor,
    matcher: CosineMatcher,
    store: RwLock<SignatureStore>,
}

impl<D: Detector> FaceEngine<D> {
    pub fn new(detector: D, store: SignatureStore) -> Self {
        Self {
            detector: Mutex::new(detector),
            extractor: FeatureExtractor::default(),
            matcher: CosineMatcher,
            store: RwLock::new(store),
        }
    }

    /// Load the store at `path` (empty if absent) and build an engine over it.
    pub fn open(detector: D, path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let store = SignatureStore::load(path)?;
        tracing::info!(
            path = %store.path().display(),
            enrolled = store.len(),
            "signature store opened"
        );
        Ok(Self::new(detector, store))
    }

    pub fn with_extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Detect, pick the primary face, and extract its signature.
    pub fn encode(&self, image: &DynamicImage) -> Result<(BoundingBox, Signature), EngineError> {
        let boxes = {
            let mut detector = self.detector.lock().map_err(|_| EngineError::LockPoisoned)?;
            detector.detect(image)?
        };
        tracing::debug!(faces = boxes.len(), "detection complete");

        let bbox = *select_primary(&boxes).ok_or(EngineError::NoFaceDetected)?;
        if boxes.len() > 1 {
            tracing::debug!(?bbox, candidates = boxes.len(), "selected largest face");
        }

        let signature = self.extractor.extract(image, &bbox)?;
        Ok((bbox, signature))
    }

    /// Enroll the primary face in `image` under `identity`.
    ///
    /// Re-enrolling blends the new capture with the stored signature as an
    /// element-wise mean of exactly those two.
    pub fn enroll(
        &self,
        image: &DynamicImage,
        identity: &str,
    ) -> Result<EnrollOutcome, EngineError> {
        let (bbox, signature) = self.encode(image)?;

        let mut store = self.write_store()?;
        let (signature, outcome) = match store.get(identity) {
            Some(existing) => (existing.average(&signature)?, EnrollOutcome::Refined),
            None => (signature, EnrollOutcome::Created),
        };

        // Memory only keeps the change once the file has it.
        let previous = store.put(identity, signature)?;
        if let Err(e) = store.save() {
            store.revert_put(identity, previous);
            return Err(e.into());
        }

        tracing::info!(identity, ?outcome, ?bbox, enrolled = store.len(), "face enrolled");
        Ok(outcome)
    }

    /// Find the enrolled identity closest to the primary face in `image`.
    ///
    /// Returns `Ok(None)` when a face was compared but nothing reached
    /// `threshold`, and `EmptyStore` when there was nothing to compare with.
    pub fn recognize(
        &self,
        image: &DynamicImage,
        threshold: f32,
    ) -> Result<Option<MatchResult>, EngineError> {
        let (_, probe) = self.encode(image)?;
        self.match_signature(&probe, threshold)
    }

    /// Threshold decision for an already extracted probe signature.
    pub fn match_signature(
        &self,
        probe: &Signature,
        threshold: f32,
    ) -> Result<Option<MatchResult>, EngineError> {
        let store = self.read_store()?;
        let best = self
            .matcher
            .best_match(probe, store.entries())?
            .ok_or(EngineError::EmptyStore)?;

        if best.similarity >= threshold {
            tracing::info!(
                identity = %best.identity,
                similarity = best.similarity,
                "face recognized"
            );
            Ok(Some(best))
        } else {
            tracing::info!(
                best_similarity = best.similarity,
                threshold,
                "no match above threshold"
            );
            Ok(None)
        }
    }

    /// [`recognize`](Self::recognize) with [`DEFAULT_THRESHOLD`].
    pub fn recognize_default(
        &self,
        image: &DynamicImage,
    ) -> Result<Option<MatchResult>, EngineError> {
        self.recognize(image, DEFAULT_THRESHOLD)
    }

    /// Similarity between the primary faces of two images.
    pub fn compare(&self, a: &DynamicImage, b: &DynamicImage) -> Result<f32, EngineError> {
        let (_, sig_a) = self.encode(a)?;
        let (_, sig_b) = self.encode(b)?;
        Ok(sig_a.similarity(&sig_b)?)
    }

    /// Enrolled identities in enrollment order.
    pub fn list_enrolled(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.read_store()?.identities())
    }

    /// Remove `identity`; returns whether it was enrolled.
    pub fn delete_enrollment(&self, identity: &str) -> Result<bool, EngineError> {
        let mut store = self.write_store()?;
        let Some((index, entry)) = store.take(identity) else {
            tracing::info!(identity, "delete requested for unknown identity");
            return Ok(false);
        };

        if let Err(e) = store.save() {
            store.restore(index, entry);
            return Err(e.into());
        }

        tracing::info!(identity, enrolled = store.len(), "enrollment deleted");
        Ok(true)
    }

    /// Copy of the stored signature for `identity`.
    pub fn signature(&self, identity: &str) -> Result<Option<Signature>, EngineError> {
        Ok(self.read_store()?.get(identity).cloned())
    }

    pub fn enrolled_count(&self) -> Result<usize, EngineError> {
        Ok(self.read_store()?.len())
    }

    /// Signature length of the enrolled faces, `None` while the store is empty.
    pub fn dimension(&self) -> Result<Option<usize>, EngineError> {
        Ok(self.read_store()?.dimension())
    }

    pub fn store_path(&self) -> Result<PathBuf, EngineError> {
        Ok(self.read_store()?.path().to_path_buf())
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    fn read_store(&self) -> Result<RwLockReadGuard<'_, SignatureStore>, EngineError> {
        self.store.read().map_err(|_| EngineError::LockPoisoned)
    }

    fn write_store(&self) -> Result<RwLockWriteGuard<'_, SignatureStore>, EngineError> {
        self.store.write().map_err(|_| EngineError::LockPoisoned)
    }
}

impl<D> std::fmt::Debug for FaceEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceEngine")
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FixedDetector;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn face_image(seed: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(120, 120, |x, y| {
            let v = ((x * 7 + y * 13 + seed * 31) % 251) as u8;
            Rgb([v, v / 2, 255 - v])
        }))
    }

    #[test]
    fn test_enroll_failure_leaves_memory_untouched() {
        let tmp = TempDir::new().unwrap();
        // A directory where the store file should be makes the rename fail.
        let path = tmp.path().join("store.bin");
        std::fs::create_dir(&path).unwrap();

        let engine = FaceEngine::new(
            FixedDetector::new(vec![BoundingBox::new(0, 0, 120, 120)]),
            SignatureStore::empty(&path),
        );
        let err = engine.enroll(&face_image(1), "S1").unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Io { .. })), "got {err:?}");
        assert_eq!(engine.enrolled_count().unwrap(), 0);
    }

    fn break_store_file(path: &std::path::Path) {
        // A directory in place of the file makes the next rename fail.
        std::fs::remove_file(path).unwrap();
        std::fs::create_dir(path).unwrap();
    }

    #[test]
    fn test_failed_refine_keeps_previous_signature() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.bin");
        let engine =
            FaceEngine::open(FixedDetector::new(vec![BoundingBox::new(0, 0, 120, 120)]), &path)
                .unwrap();
        engine.enroll(&face_image(1), "S1").unwrap();
        engine.enroll(&face_image(2), "S2").unwrap();
        let before = engine.signature("S1").unwrap();

        break_store_file(&path);
        assert!(engine.enroll(&face_image(3), "S1").is_err());
        assert_eq!(engine.signature("S1").unwrap(), before);
        assert_eq!(engine.list_enrolled().unwrap(), vec!["S1", "S2"]);
    }

    #[test]
    fn test_failed_delete_keeps_entry_in_place() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.bin");
        let engine =
            FaceEngine::open(FixedDetector::new(vec![BoundingBox::new(0, 0, 120, 120)]), &path)
                .unwrap();
        engine.enroll(&face_image(1), "S1").unwrap();
        engine.enroll(&face_image(2), "S2").unwrap();

        break_store_file(&path);
        assert!(engine.delete_enrollment("S1").is_err());
        assert_eq!(engine.list_enrolled().unwrap(), vec!["S1", "S2"]);
        assert_eq!(engine.dimension().unwrap(), Some(10_000));
    }

    #[test]
    fn test_no_face_detected() {
        let tmp = TempDir::new().unwrap();
        let engine =
            FaceEngine::open(FixedDetector::new(vec![]), tmp.path().join("s.bin")).unwrap();
        assert!(matches!(
            engine.enroll(&face_image(1), "S1"),
            Err(EngineError::NoFaceDetected)
        ));
        assert!(matches!(
            engine.recognize_default(&face_image(1)),
            Err(EngineError::NoFaceDetected)
        ));
    }

    #[test]
    fn test_out_of_bounds_box_is_extraction_error() {
        let tmp = TempDir::new().unwrap();
        let engine = FaceEngine::open(
            FixedDetector::new(vec![BoundingBox::new(100, 100, 50, 50)]),
            tmp.path().join("s.bin"),
        )
        .unwrap();
        assert!(matches!(
            engine.enroll(&face_image(1), "S1"),
            Err(EngineError::Extraction(ExtractionError::OutOfBounds { .. }))
        ));
    }
}

//! rollcall-core: face enrollment and matching engine.
//!
//! Turns a face region into a fixed-length intensity signature, keeps one
//! signature per identity in a durable store, and matches probe images
//! against every stored signature by remapped cosine similarity.
//!
//! Detection is pluggable through [`Detector`]; the optional `scrfd` feature
//! adds an ONNX Runtime SCRFD detector.

pub mod detector;
pub mod engine;
pub mod extractor;
pub mod matcher;
#[cfg(feature = "scrfd")]
pub mod scrfd;
pub mod store;
pub mod types;

pub use detector::{Detector, DetectorError, FixedDetector, FullFrameDetector};
pub use engine::{EngineError, EnrollOutcome, FaceEngine, DEFAULT_THRESHOLD};
pub use extractor::{ExtractionError, FeatureExtractor};
pub use matcher::{CosineMatcher, Matcher};
#[cfg(feature = "scrfd")]
pub use scrfd::ScrfdDetector;
pub use store::{SignatureStore, StoreError};
pub use types::{BoundingBox, DimensionMismatch, Enrollment, MatchResult, Signature};

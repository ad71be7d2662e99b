use std::fs;

use image::{DynamicImage, Rgb, RgbImage};
use rollcall_core::{
    BoundingBox, EngineError, EnrollOutcome, FaceEngine, FeatureExtractor, FixedDetector,
    FullFrameDetector, SignatureStore,
};
use tempfile::TempDir;

/// Deterministic textured image; different seeds give different textures.
fn face_image(seed: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(128, 128, |x, y| {
        let v = ((x * (7 + seed) + y * (13 + 2 * seed) + seed * 31) % 251) as u8;
        Rgb([v, v.wrapping_mul(3), 255 - v])
    }))
}

/// `base` with a small patch brightened.
fn near_copy(base: &DynamicImage) -> DynamicImage {
    let mut rgb = base.to_rgb8();
    for y in 40..48 {
        for x in 40..48 {
            let p = rgb.get_pixel_mut(x, y);
            p.0 = p.0.map(|c| c.saturating_add(20));
        }
    }
    DynamicImage::ImageRgb8(rgb)
}

fn open_engine(tmp: &TempDir) -> FaceEngine<FullFrameDetector> {
    FaceEngine::open(FullFrameDetector, tmp.path().join("signatures.bin")).unwrap()
}

#[test]
fn enroll_then_recognize_same_image() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let img = face_image(1);

    assert_eq!(engine.enroll(&img, "S1").unwrap(), EnrollOutcome::Created);
    let result = engine.recognize_default(&img).unwrap().expect("should match");
    assert_eq!(result.identity, "S1");
    assert!(result.similarity >= 0.999, "similarity {}", result.similarity);
}

#[test]
fn reenroll_stores_mean_of_two_captures() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let first = face_image(2);
    let second = near_copy(&first);

    let extractor = FeatureExtractor::default();
    let sig_first = extractor
        .extract(&first, &BoundingBox::full_frame(128, 128))
        .unwrap();
    let sig_second = extractor
        .extract(&second, &BoundingBox::full_frame(128, 128))
        .unwrap();
    assert_ne!(sig_first, sig_second);

    engine.enroll(&first, "S1").unwrap();
    assert_eq!(engine.enroll(&second, "S1").unwrap(), EnrollOutcome::Refined);

    let stored = engine.signature("S1").unwrap().unwrap();
    assert_eq!(stored, sig_first.average(&sig_second).unwrap());

    // Persisted value matches memory exactly
    let reloaded = SignatureStore::load(tmp.path().join("signatures.bin")).unwrap();
    assert_eq!(reloaded.get("S1"), Some(&stored));
    assert_eq!(reloaded.len(), 1);
}

#[test]
fn third_enrollment_blends_only_with_latest_value() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let images = [face_image(3), face_image(4), face_image(5)];
    let extractor = FeatureExtractor::default();
    let sigs: Vec<_> = images
        .iter()
        .map(|img| extractor.extract(img, &BoundingBox::full_frame(128, 128)).unwrap())
        .collect();

    for img in &images {
        engine.enroll(img, "S1").unwrap();
    }

    let expected = sigs[0].average(&sigs[1]).unwrap().average(&sigs[2]).unwrap();
    assert_eq!(engine.signature("S1").unwrap().unwrap(), expected);
}

#[test]
fn recognize_empty_store_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    assert!(matches!(
        engine.recognize_default(&face_image(1)),
        Err(EngineError::EmptyStore)
    ));
}

#[test]
fn threshold_above_one_never_matches() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let img = face_image(6);
    engine.enroll(&img, "S1").unwrap();
    engine.enroll(&face_image(7), "S2").unwrap();

    assert_eq!(engine.recognize(&img, 1.1).unwrap(), None);
}

#[test]
fn best_match_score_equals_independent_similarity() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let a = face_image(8);
    let b = face_image(9);
    engine.enroll(&a, "S1").unwrap();
    engine.enroll(&b, "S2").unwrap();

    let probe = near_copy(&a);
    let result = engine.recognize(&probe, 0.0).unwrap().unwrap();
    assert_eq!(result.identity, "S1");

    let extractor = FeatureExtractor::default();
    let probe_sig = extractor
        .extract(&probe, &BoundingBox::full_frame(128, 128))
        .unwrap();
    let stored = engine.signature("S1").unwrap().unwrap();
    assert_eq!(result.similarity, probe_sig.similarity(&stored).unwrap());
}

#[test]
fn largest_detected_face_is_enrolled() {
    let tmp = TempDir::new().unwrap();
    let small = BoundingBox::new(0, 0, 40, 40);
    let large = BoundingBox::new(20, 10, 100, 100);
    let engine = FaceEngine::open(
        FixedDetector::new(vec![small, large]),
        tmp.path().join("signatures.bin"),
    )
    .unwrap();

    let img = face_image(10);
    engine.enroll(&img, "S1").unwrap();

    let expected = FeatureExtractor::default().extract(&img, &large).unwrap();
    assert_eq!(engine.signature("S1").unwrap().unwrap(), expected);
}

#[test]
fn delete_enrollment() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("signatures.bin");
    let engine = open_engine(&tmp);
    engine.enroll(&face_image(11), "S1").unwrap();
    engine.enroll(&face_image(12), "S2").unwrap();
    let before = fs::read(&path).unwrap();

    assert!(!engine.delete_enrollment("nobody").unwrap());
    assert_eq!(engine.list_enrolled().unwrap(), vec!["S1", "S2"]);
    assert_eq!(fs::read(&path).unwrap(), before);

    assert!(engine.delete_enrollment("S1").unwrap());
    assert_eq!(engine.list_enrolled().unwrap(), vec!["S2"]);
    let reloaded = SignatureStore::load(&path).unwrap();
    assert_eq!(reloaded.identities(), vec!["S2"]);
}

#[test]
fn reopened_engine_sees_previous_enrollments() {
    let tmp = TempDir::new().unwrap();
    let img = face_image(13);
    {
        let engine = open_engine(&tmp);
        engine.enroll(&img, "S1").unwrap();
    }

    let engine = open_engine(&tmp);
    assert_eq!(engine.list_enrolled().unwrap(), vec!["S1"]);
    assert_eq!(engine.dimension().unwrap(), Some(10_000));
    let result = engine.recognize_default(&img).unwrap().unwrap();
    assert_eq!(result.identity, "S1");
}

#[test]
fn corrupt_store_fails_to_open() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("signatures.bin");
    fs::write(&path, vec![0xAB; 128]).unwrap();

    let err = FaceEngine::open(FullFrameDetector, &path).unwrap_err();
    assert!(
        matches!(err, EngineError::Store(rollcall_core::StoreError::Corrupt { .. })),
        "got {err:?}"
    );
}

#[test]
fn concurrent_enrollments_are_not_lost() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);

    std::thread::scope(|scope| {
        for i in 0..8u32 {
            let engine = &engine;
            scope.spawn(move || {
                engine
                    .enroll(&face_image(20 + i), &format!("S{i}"))
                    .unwrap();
            });
        }
    });

    assert_eq!(engine.enrolled_count().unwrap(), 8);
    let reloaded = SignatureStore::load(tmp.path().join("signatures.bin")).unwrap();
    assert_eq!(reloaded.len(), 8);
    for i in 0..8 {
        assert!(reloaded.contains(&format!("S{i}")));
    }
}

#[test]
fn compare_same_image_is_one() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let img = face_image(14);
    assert_eq!(engine.compare(&img, &img).unwrap(), 1.0);
}

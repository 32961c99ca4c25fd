use std::path::{Path, PathBuf};

use image::{ImageBuffer, Rgb};
use tempfile::TempDir;
use vision_harness::{DetectionRecord, ExpectedOutcome, Fixture, FixtureId, NormalizedBox};

/// Writes a 64x48 PNG filled with a colour derived from `seed` and returns
/// the encoded bytes. Different seeds give different bytes, which lets a
/// `StubDetector` script answers per image.
pub fn write_test_image(path: &Path, seed: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(64, 48, |x, y| {
        Rgb([seed, (x as u8).wrapping_mul(3), (y as u8).wrapping_add(seed)])
    });
    img.save_with_format(path, image::ImageFormat::Png)
        .expect("Failed to save test image");
    std::fs::read(path).expect("Failed to read test image back")
}

/// Creates an image directory holding `<ID>.png` for every fixture.
/// Returns the directory (keep it alive) and each fixture paired with its
/// image path and bytes, in catalog order.
pub fn create_image_dir(fixtures: &[Fixture]) -> (TempDir, Vec<(Fixture, PathBuf, Vec<u8>)>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let entries = fixtures
        .iter()
        .enumerate()
        .map(|(i, fixture)| {
            let path = dir.path().join(format!("{}.png", fixture.id));
            let bytes = write_test_image(&path, (i as u8).wrapping_mul(17).wrapping_add(1));
            (fixture.clone(), path, bytes)
        })
        .collect();
    (dir, entries)
}

/// Strips the bytes off `create_image_dir` entries for `Runner::run`
pub fn runnable(entries: &[(Fixture, PathBuf, Vec<u8>)]) -> Vec<(Fixture, PathBuf)> {
    entries
        .iter()
        .map(|(fixture, path, _)| (fixture.clone(), path.clone()))
        .collect()
}

pub fn id(raw: &str) -> FixtureId {
    raw.parse().expect("valid fixture id")
}

/// A people-counting fixture with exact count and no tolerance
pub fn people_fixture(raw_id: &str, count: u32) -> Fixture {
    Fixture::new(id(raw_id), format!("{} people", count), ExpectedOutcome::people(count))
}

pub fn person(confidence: f32) -> DetectionRecord {
    DetectionRecord::new("Person", confidence, NormalizedBox::new(0.1, 0.2, 0.3, 0.6))
}

pub fn people(n: usize, confidence: f32) -> Vec<DetectionRecord> {
    (0..n).map(|_| person(confidence)).collect()
}

pub fn object(label: &str, confidence: f32) -> DetectionRecord {
    DetectionRecord::new(label, confidence, NormalizedBox::new(0.5, 0.5, 0.7, 0.9))
}

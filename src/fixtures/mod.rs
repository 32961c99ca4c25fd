pub mod catalog;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub use catalog::{Catalog, builtin_catalog, load_catalog, parse_catalog};

/// Labels the detection service uses for people
pub const PEOPLE_LABELS: &[&str] = &["person", "people", "pedestrian"];

/// Image extensions tried, in order, when looking up a fixture image
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Test-design technique a fixture belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "BVA")]
    BoundaryValue,
    #[serde(rename = "EP")]
    EquivalencePartition,
    #[serde(rename = "DT")]
    DecisionTable,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::BoundaryValue,
        Category::EquivalencePartition,
        Category::DecisionTable,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Category::BoundaryValue => "BVA",
            Category::EquivalencePartition => "EP",
            Category::DecisionTable => "DT",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::BoundaryValue => "Boundary Value Analysis",
            Category::EquivalencePartition => "Equivalence Partition",
            Category::DecisionTable => "Decision Table",
        }
    }
}

impl FromStr for Category {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BVA" => Ok(Category::BoundaryValue),
            "EP" => Ok(Category::EquivalencePartition),
            "DT" => Ok(Category::DecisionTable),
            other => Err(HarnessError::Catalog(format!("unknown category '{}'", other))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Fixture identifier such as `BVA-001`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FixtureId {
    pub category: Category,
    pub sequence: u16,
}

impl FixtureId {
    pub fn new(category: Category, sequence: u16) -> Self {
        Self { category, sequence }
    }
}

impl FromStr for FixtureId {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || HarnessError::Catalog(format!("malformed fixture id '{}' (expected e.g. BVA-001)", s));

        let (cat, seq) = s.trim().split_once('-').ok_or_else(bad)?;
        let category: Category = cat.parse().map_err(|_| bad())?;
        if seq.len() != 3 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let sequence = seq.parse().map_err(|_| bad())?;
        Ok(Self { category, sequence })
    }
}

impl TryFrom<String> for FixtureId {
    type Error = HarnessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FixtureId> for String {
    fn from(id: FixtureId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.category.code(), self.sequence)
    }
}

/// Crowd-size bucket of the expected count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupSize {
    Individual,
    Small,
    Medium,
    Large,
    Crowd,
}

impl GroupSize {
    pub fn for_count(count: u32) -> Self {
        match count {
            0..=1 => GroupSize::Individual,
            2..=5 => GroupSize::Small,
            6..=10 => GroupSize::Medium,
            11..=20 => GroupSize::Large,
            _ => GroupSize::Crowd,
        }
    }

    /// Count tolerance conventionally allowed for this group size
    pub fn default_tolerance(&self, count: u32) -> u32 {
        match self {
            GroupSize::Individual => count.min(1),
            GroupSize::Small => 1,
            GroupSize::Medium => 2,
            GroupSize::Large | GroupSize::Crowd => count / 5,
        }
    }
}

/// What the detection service should report for a fixture image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    pub target_labels: Vec<String>,
    /// Expected number of matching detections; 0 means the class must be absent
    pub count: u32,
    /// Allowed absolute count error
    pub tolerance: u32,
    /// Minimum detected/expected ratio, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_detection_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_mean_confidence: Option<f32>,
}

impl ExpectedOutcome {
    /// Exact count of people, no tolerance
    pub fn people(count: u32) -> Self {
        Self {
            target_labels: PEOPLE_LABELS.iter().map(|s| s.to_string()).collect(),
            count,
            tolerance: 0,
            min_detection_rate: None,
            min_mean_confidence: None,
        }
    }

    /// No person may be detected
    pub fn no_people() -> Self {
        Self::people(0)
    }

    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_min_detection_rate(mut self, percent: f64) -> Self {
        self.min_detection_rate = Some(percent);
        self
    }

    pub fn with_min_mean_confidence(mut self, confidence: f32) -> Self {
        self.min_mean_confidence = Some(confidence);
        self
    }

    pub fn expects_absence(&self) -> bool {
        self.count == 0
    }
}

/// One named test case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fixture {
    pub id: FixtureId,
    pub name: String,
    /// Explicit image file name, relative to the image directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub group: GroupSize,
    pub expected: ExpectedOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Fixture {
    pub fn new(id: FixtureId, name: impl Into<String>, expected: ExpectedOutcome) -> Self {
        Self {
            id,
            name: name.into(),
            image: None,
            group: GroupSize::for_count(expected.count),
            expected,
            notes: None,
        }
    }

    pub fn category(&self) -> Category {
        self.id.category
    }
}

/// Locate the image for a fixture: the explicit file name if one is set,
/// otherwise `<ID>.jpg`, `<ID>.jpeg`, `<ID>.png` in that order.
pub fn find_image(dir: &Path, fixture: &Fixture) -> Option<PathBuf> {
    if let Some(name) = &fixture.image {
        let path = dir.join(name);
        return path.is_file().then_some(path);
    }

    let id = fixture.id.to_string();
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", id, ext)))
        .find(|p| p.is_file())
}

/// Resolve the image of every fixture up front. A missing directory or a
/// missing image is fatal.
pub fn resolve_images<'a>(
    dir: &Path,
    fixtures: impl IntoIterator<Item = &'a Fixture>,
) -> Result<Vec<(Fixture, PathBuf)>, HarnessError> {
    if !dir.is_dir() {
        return Err(HarnessError::MissingImageDir(dir.to_path_buf()));
    }

    fixtures
        .into_iter()
        .map(|fixture| {
            find_image(dir, fixture)
                .map(|path| (fixture.clone(), path))
                .ok_or_else(|| HarnessError::MissingImage {
                    id: fixture.id.to_string(),
                    dir: dir.to_path_buf(),
                })
        })
        .collect()
}

/// Images named like a fixture (`<CATEGORY>-<NNN>.<ext>`) that have no catalog entry
pub fn orphan_images(dir: &Path, catalog: &Catalog) -> std::io::Result<Vec<PathBuf>> {
    let known: HashSet<FixtureId> = catalog.iter().map(|f| f.id).collect();
    let mut orphans = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(id) = stem.parse::<FixtureId>() {
            if !known.contains(&id) {
                orphans.push(path);
            }
        }
    }

    orphans.sort();
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_ids() {
        let id: FixtureId = "BVA-001".parse().unwrap();
        assert_eq!(id, FixtureId::new(Category::BoundaryValue, 1));
        assert_eq!(id.to_string(), "BVA-001");

        let id: FixtureId = "dt-006".parse().unwrap();
        assert_eq!(id.to_string(), "DT-006");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["BVA001", "XX-001", "EP-1", "EP-0001", "EP-abc", ""] {
            assert!(bad.parse::<FixtureId>().is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn group_sizes_follow_count_buckets() {
        assert_eq!(GroupSize::for_count(0), GroupSize::Individual);
        assert_eq!(GroupSize::for_count(1), GroupSize::Individual);
        assert_eq!(GroupSize::for_count(5), GroupSize::Small);
        assert_eq!(GroupSize::for_count(6), GroupSize::Medium);
        assert_eq!(GroupSize::for_count(20), GroupSize::Large);
        assert_eq!(GroupSize::for_count(21), GroupSize::Crowd);
    }

    #[test]
    fn default_tolerances() {
        assert_eq!(GroupSize::Individual.default_tolerance(0), 0);
        assert_eq!(GroupSize::Individual.default_tolerance(1), 1);
        assert_eq!(GroupSize::Small.default_tolerance(4), 1);
        assert_eq!(GroupSize::Medium.default_tolerance(8), 2);
        assert_eq!(GroupSize::Large.default_tolerance(12), 2);
        assert_eq!(GroupSize::Crowd.default_tolerance(22), 4);
    }

    #[test]
    fn finds_image_by_extension_order() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("EP-003.png"), b"png").unwrap();
        std::fs::write(dir.path().join("EP-003.jpeg"), b"jpeg").unwrap();

        let fixture = Fixture::new("EP-003".parse().unwrap(), "x", ExpectedOutcome::no_people());
        let found = find_image(dir.path(), &fixture).unwrap();
        assert_eq!(found.file_name().unwrap(), "EP-003.jpeg");
    }

    #[test]
    fn missing_directory_is_fatal() {
        let fixture = Fixture::new("EP-003".parse().unwrap(), "x", ExpectedOutcome::no_people());
        let err = resolve_images(Path::new("/definitely/not/here"), [&fixture]).unwrap_err();
        assert!(matches!(err, HarnessError::MissingImageDir(_)));
    }
}

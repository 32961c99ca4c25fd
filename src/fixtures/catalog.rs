use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use super::{ExpectedOutcome, Fixture, FixtureId, GroupSize, PEOPLE_LABELS};
use crate::error::HarnessError;

const BUILTIN_CATALOG: &str = include_str!("../../catalog/people.toml");

/// Ordered, validated set of fixtures
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    fixtures: Vec<Fixture>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids and empty label sets
    pub fn new(fixtures: Vec<Fixture>) -> Result<Self, HarnessError> {
        if fixtures.is_empty() {
            return Err(HarnessError::Catalog("catalog contains no fixtures".into()));
        }

        let mut seen = HashSet::new();
        for fixture in &fixtures {
            if !seen.insert(fixture.id) {
                return Err(HarnessError::Catalog(format!("duplicate fixture id {}", fixture.id)));
            }
            validate_expected(fixture)?;
        }

        Ok(Self { fixtures })
    }

    pub fn get(&self, id: &FixtureId) -> Option<&Fixture> {
        self.fixtures.iter().find(|f| f.id == *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fixture> {
        self.fixtures.iter()
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

fn validate_expected(fixture: &Fixture) -> Result<(), HarnessError> {
    let expected = &fixture.expected;
    if expected.target_labels.iter().all(|l| l.trim().is_empty()) {
        return Err(HarnessError::Catalog(format!("{}: no target labels", fixture.id)));
    }
    if let Some(rate) = expected.min_detection_rate {
        if !(0.0..=100.0).contains(&rate) {
            return Err(HarnessError::Catalog(format!(
                "{}: min_detection_rate {} is outside 0-100",
                fixture.id, rate
            )));
        }
    }
    if let Some(conf) = expected.min_mean_confidence {
        if !(0.0..=1.0).contains(&conf) {
            return Err(HarnessError::Catalog(format!(
                "{}: min_mean_confidence {} is outside 0-1",
                fixture.id, conf
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default, rename = "fixture")]
    fixtures: Vec<FixtureEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixtureEntry {
    id: String,
    name: String,
    image: Option<String>,
    labels: Option<Vec<String>>,
    count: u32,
    tolerance: Option<u32>,
    group: Option<GroupSize>,
    min_detection_rate: Option<f64>,
    min_mean_confidence: Option<f32>,
    notes: Option<String>,
}

impl FixtureEntry {
    fn into_fixture(self) -> Result<Fixture, HarnessError> {
        let id: FixtureId = self.id.parse()?;

        // An explicit tolerance wins; otherwise an explicit group implies the
        // conventional tolerance for that group; otherwise the count is exact.
        let tolerance = match (self.tolerance, self.group) {
            (Some(t), _) => t,
            (None, Some(group)) => group.default_tolerance(self.count),
            (None, None) => 0,
        };

        let target_labels = self
            .labels
            .unwrap_or_else(|| PEOPLE_LABELS.iter().map(|s| s.to_string()).collect());

        Ok(Fixture {
            id,
            name: self.name,
            image: self.image,
            group: self.group.unwrap_or_else(|| GroupSize::for_count(self.count)),
            expected: ExpectedOutcome {
                target_labels,
                count: self.count,
                tolerance,
                min_detection_rate: self.min_detection_rate,
                min_mean_confidence: self.min_mean_confidence,
            },
            notes: self.notes,
        })
    }
}

/// Parse a catalog from TOML text
pub fn parse_catalog(raw: &str) -> Result<Catalog, HarnessError> {
    let file: CatalogFile =
        toml::from_str(raw).map_err(|e| HarnessError::Catalog(e.message().to_string()))?;

    let fixtures = file
        .fixtures
        .into_iter()
        .map(FixtureEntry::into_fixture)
        .collect::<Result<Vec<_>, _>>()?;

    Catalog::new(fixtures)
}

/// Load a catalog from a TOML file
pub fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture catalog {}", path.display()))?;
    Ok(parse_catalog(&raw)?)
}

/// The people-detection catalog shipped with the harness
pub fn builtin_catalog() -> Result<Catalog, HarnessError> {
    parse_catalog(BUILTIN_CATALOG)
}

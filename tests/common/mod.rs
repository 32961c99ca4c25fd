mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from vision_harness for tests
pub use vision_harness::{
    Catalog, DetectionRecord, DetectorError, Discrepancy, ExpectedOutcome, Fixture, FixtureId,
    NormalizedBox, RunResult, RunStatus, Runner, StubDetector, Verdict,
};

pub mod annotate;
pub mod config;
pub mod detection;
pub mod error;
pub mod evaluation;
pub mod fixtures;
pub mod models;
pub mod report;
pub mod runner;

pub use config::HarnessConfig;
pub use detection::{Credentials, DetectionResponse, Detector, DetectorError, StubDetector, VisionClient};
pub use error::HarnessError;
pub use evaluation::{Discrepancy, Evaluation, Evaluator, Verdict};
pub use fixtures::{Catalog, Category, ExpectedOutcome, Fixture, FixtureId};
pub use models::{DetectionRecord, NormalizedBox, Vertex};
pub use report::{RunResult, RunStatus, RunSummary};
pub use runner::{Interrupt, RunReport, Runner};

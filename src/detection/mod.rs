pub mod stub;
pub mod vision;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::models::DetectionRecord;

pub use stub::StubDetector;
pub use vision::{Credentials, VisionClient};

/// Failure of a single detection call. These are recovered per fixture.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    /// Service unreachable, connection reset, transport-level timeout, 5xx
    #[error("network error: {0}")]
    Network(String),

    /// Missing or rejected credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// Rate limit or quota exhausted
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// The call exceeded the per-fixture wall-clock budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered but the payload could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Everything the service reported for one image, plus how long it took
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResponse {
    pub records: Vec<DetectionRecord>,
    pub latency: Duration,
}

/// Seam around the external object-detection service
pub trait Detector {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run object localization on an encoded image (JPEG/PNG bytes)
    fn detect(&self, image: &[u8]) -> impl Future<Output = Result<DetectionResponse, DetectorError>>;
}

impl<D: Detector> Detector for &D {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn detect(&self, image: &[u8]) -> impl Future<Output = Result<DetectionResponse, DetectorError>> {
        (**self).detect(image)
    }
}

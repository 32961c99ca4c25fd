//! Google Cloud Vision `images:annotate` client (OBJECT_LOCALIZATION feature).

use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DetectionResponse, Detector, DetectorError};
use crate::models::{DetectionRecord, NormalizedBox, Vertex};

pub const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";
pub const DEFAULT_MAX_RESULTS: u32 = 50;

/// Credentials handed to the client at construction.
/// An OAuth access token takes precedence over an API key.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            access_token: None,
        }
    }

    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            api_key: None,
            access_token: Some(token.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.api_key) && blank(&self.access_token)
    }
}

// Never print secrets
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
    max_results: u32,
}

impl VisionClient {
    pub fn new(credentials: Credentials) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vision_harness/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials,
            max_results: DEFAULT_MAX_RESULTS,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }
}

impl Detector for VisionClient {
    fn name(&self) -> &str {
        "google-vision"
    }

    async fn detect(&self, image: &[u8]) -> Result<DetectionResponse, DetectorError> {
        let started = Instant::now();
        let body = AnnotateRequest::object_localization(image, self.max_results);

        let mut request = self.http.post(&self.endpoint).json(&body);
        request = match (&self.credentials.access_token, &self.credentials.api_key) {
            (Some(token), _) if !token.trim().is_empty() => request.bearer_auth(token.trim()),
            (_, Some(key)) if !key.trim().is_empty() => request.query(&[("key", key.trim())]),
            _ => {
                return Err(DetectorError::Auth(
                    "no Vision API key or access token configured".into(),
                ));
            }
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        debug!(status = status.as_u16(), bytes = text.len(), "vision response");

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }

        let records = parse_annotate_response(&text)?;
        Ok(DetectionResponse {
            records,
            latency: started.elapsed(),
        })
    }
}

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

impl AnnotateRequest {
    fn object_localization(image: &[u8], max_results: u32) -> Self {
        Self {
            requests: vec![ImageRequest {
                image: ImageContent {
                    content: BASE64.encode(image),
                },
                features: vec![Feature {
                    kind: "OBJECT_LOCALIZATION",
                    max_results,
                }],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    localized_object_annotations: Vec<LocalizedObject>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalizedObject {
    name: String,
    #[serde(default)]
    score: f32,
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundingPoly {
    #[serde(default)]
    normalized_vertices: Vec<Vertex>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiStatus,
}

/// Parse an `images:annotate` response body into detection records
pub(crate) fn parse_annotate_response(body: &str) -> Result<Vec<DetectionRecord>, DetectorError> {
    let parsed: AnnotateResponse =
        serde_json::from_str(body).map_err(|e| DetectorError::Malformed(e.to_string()))?;

    let image = parsed
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| DetectorError::Malformed("response contains no entries".into()))?;

    if let Some(status) = image.error {
        if status.code != 0 || !status.message.is_empty() {
            return Err(rpc_error(&status));
        }
    }

    image
        .localized_object_annotations
        .into_iter()
        .map(|obj| {
            if !obj.score.is_finite() || !(0.0..=1.0).contains(&obj.score) {
                return Err(DetectorError::Malformed(format!(
                    "score {} for '{}' is outside 0-1",
                    obj.score, obj.name
                )));
            }
            let bbox = obj
                .bounding_poly
                .and_then(|p| NormalizedBox::from_vertices(&p.normalized_vertices))
                .ok_or_else(|| {
                    DetectorError::Malformed(format!("object '{}' has no bounding polygon", obj.name))
                })?;
            Ok(DetectionRecord::new(obj.name, obj.score, bbox))
        })
        .collect()
}

/// Map a google.rpc status (per-image error) to a detector error
fn rpc_error(status: &ApiStatus) -> DetectorError {
    let detail = if status.message.is_empty() {
        status.status.clone()
    } else {
        status.message.clone()
    };
    match (status.code, status.status.as_str()) {
        (16, _) | (7, _) | (_, "UNAUTHENTICATED") | (_, "PERMISSION_DENIED") => DetectorError::Auth(detail),
        (8, _) | (_, "RESOURCE_EXHAUSTED") => DetectorError::Quota(detail),
        (4, _) | (14, _) | (_, "UNAVAILABLE") | (_, "DEADLINE_EXCEEDED") => DetectorError::Network(detail),
        _ => DetectorError::Malformed(detail),
    }
}

/// Map a non-2xx HTTP status (with its body) to a detector error
pub(crate) fn status_error(code: u16, body: &str) -> DetectorError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| format!("HTTP {}: {}", code, env.error.message))
        .unwrap_or_else(|_| format!("HTTP {}", code));

    match code {
        401 | 403 => DetectorError::Auth(detail),
        429 => DetectorError::Quota(detail),
        408 | 500..=599 => DetectorError::Network(detail),
        _ => DetectorError::Malformed(detail),
    }
}

fn transport_error(err: reqwest::Error) -> DetectorError {
    if err.is_decode() {
        DetectorError::Malformed(err.to_string())
    } else {
        DetectorError::Network(err.to_string())
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::detection::Credentials;
use crate::detection::vision::{DEFAULT_ENDPOINT, DEFAULT_MAX_RESULTS};
use crate::error::HarnessError;
use crate::evaluation::DEFAULT_CONFIDENCE_THRESHOLD;

pub const DEFAULT_CONFIG_NAME: &str = "vision-harness.toml";
pub const CONFIG_ENV: &str = "VISION_HARNESS_CONFIG";
pub const API_KEY_ENV: &str = "GOOGLE_VISION_API_KEY";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_VISION_ACCESS_TOKEN";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub endpoint: String,
    pub max_results: u32,
    pub credentials: Credentials,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            credentials: Credentials::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub images_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Fixture catalog file; None selects the built-in catalog
    pub catalog: Option<PathBuf>,
    pub confidence_threshold: f32,
    /// Wall-clock budget for one detection call
    pub timeout: Duration,
    pub annotate: bool,
    pub vision: VisionSettings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("results"),
            catalog: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            annotate: true,
            vision: VisionSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HarnessConfigFile {
    images_dir: Option<String>,
    output_dir: Option<String>,
    catalog: Option<String>,
    confidence_threshold: Option<f32>,
    timeout_secs: Option<f64>,
    annotate: Option<bool>,
    vision: Option<VisionSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VisionSection {
    endpoint: Option<String>,
    max_results: Option<u32>,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl HarnessConfig {
    /// Resolve the config file: explicit path, then `$VISION_HARNESS_CONFIG`,
    /// then `vision-harness.toml` in the working directory. Without any file
    /// the defaults apply. A named file that is missing or invalid is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_NAME);
        if default_path.exists() {
            return Self::from_path(default_path);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let file: HarnessConfigFile = toml::from_str(raw)?;
        Self::from_file(file)
    }

    fn from_file(file: HarnessConfigFile) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let vision = file.vision.unwrap_or_default();

        let timeout = match file.timeout_secs {
            Some(secs) => timeout_from_secs(secs)?,
            None => defaults.timeout,
        };

        Ok(Self {
            images_dir: file.images_dir.map(|v| expand_path(&v)).unwrap_or(defaults.images_dir),
            output_dir: file.output_dir.map(|v| expand_path(&v)).unwrap_or(defaults.output_dir),
            catalog: file.catalog.map(|v| expand_path(&v)),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            timeout,
            annotate: file.annotate.unwrap_or(defaults.annotate),
            vision: VisionSettings {
                endpoint: vision
                    .endpoint
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or(defaults.vision.endpoint),
                max_results: vision.max_results.unwrap_or(defaults.vision.max_results),
                credentials: Credentials {
                    api_key: vision.api_key,
                    access_token: vision.access_token,
                },
            },
        })
    }

    /// Fill credentials the file did not set from the given lookup
    /// (the binary passes the process environment).
    pub fn with_env_credentials(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let creds = &mut self.vision.credentials;
        if creds.api_key.is_none() {
            creds.api_key = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty());
        }
        if creds.access_token.is_none() {
            creds.access_token = lookup(ACCESS_TOKEN_ENV).filter(|v| !v.trim().is_empty());
        }
        self
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if !self.confidence_threshold.is_finite() || !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(HarnessError::Config(format!(
                "confidence_threshold must be within 0-1, got {}",
                self.confidence_threshold
            )));
        }
        if self.timeout.is_zero() {
            return Err(HarnessError::Config("timeout must be positive".into()));
        }
        if self.vision.max_results == 0 {
            return Err(HarnessError::Config("vision.max_results must be at least 1".into()));
        }
        Ok(())
    }
}

/// Convert a timeout in seconds, rejecting zero, negative, non-finite and
/// out-of-range values
pub fn timeout_from_secs(secs: f64) -> Result<Duration, HarnessError> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| secs > 0.0 && !d.is_zero())
        .ok_or_else(|| HarnessError::Config(format!("timeout must be a positive number of seconds, got {}", secs)))
}

fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

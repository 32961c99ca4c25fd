use serde::Serialize;
use thiserror::Error;

use crate::fixtures::ExpectedOutcome;
use crate::models::DetectionRecord;

/// Minimum confidence for a detection to count as a match (inclusive)
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Why a verdict failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discrepancy {
    None,
    FalsePositive,
    FalseNegative,
    /// Count within tolerance, but a detection-rate or confidence floor failed
    Miscount,
}

impl Discrepancy {
    pub const ALL: [Discrepancy; 4] = [
        Discrepancy::None,
        Discrepancy::FalsePositive,
        Discrepancy::FalseNegative,
        Discrepancy::Miscount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Discrepancy::None => "none",
            Discrepancy::FalsePositive => "false_positive",
            Discrepancy::FalseNegative => "false_negative",
            Discrepancy::Miscount => "miscount",
        }
    }
}

/// The detection records could not be evaluated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("detection '{label}' has invalid confidence {confidence}")]
    InvalidConfidence { label: String, confidence: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountMetrics {
    pub expected: u32,
    pub detected: u32,
    pub count_error: u32,
    pub tolerance: u32,
    pub within_tolerance: bool,
    /// detected / expected, in percent (0 when nothing is expected)
    pub detection_rate: f64,
    pub false_positives: u32,
    pub false_negatives: u32,
    /// Target-label detections discarded for being under the threshold
    pub below_threshold: u32,
    pub max_confidence: f32,
    pub mean_confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub discrepancy: Discrepancy,
    pub metrics: CountMetrics,
    pub failure_reasons: Vec<String>,
}

/// Pure comparison of detections against an expected outcome
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    threshold: f32,
}

impl Evaluator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Records whose label is a target label and whose confidence is at or above the threshold
    pub fn matches<'a>(
        &self,
        records: &'a [DetectionRecord],
        expected: &'a ExpectedOutcome,
    ) -> impl Iterator<Item = &'a DetectionRecord> + 'a {
        let threshold = self.threshold;
        records
            .iter()
            .filter(move |r| r.has_label(&expected.target_labels) && r.confidence >= threshold)
    }

    pub fn evaluate(
        &self,
        records: &[DetectionRecord],
        expected: &ExpectedOutcome,
    ) -> Result<Evaluation, EvaluationError> {
        if let Some(bad) = records
            .iter()
            .find(|r| !r.confidence.is_finite() || !(0.0..=1.0).contains(&r.confidence))
        {
            return Err(EvaluationError::InvalidConfidence {
                label: bad.label.clone(),
                confidence: bad.confidence,
            });
        }

        let matched: Vec<&DetectionRecord> = self.matches(records, expected).collect();
        let on_target = records
            .iter()
            .filter(|r| r.has_label(&expected.target_labels))
            .count() as u32;

        let n = expected.count;
        let detected = matched.len() as u32;
        let count_error = detected.abs_diff(n);
        let within_tolerance = count_error <= expected.tolerance;

        let max_confidence = matched.iter().map(|r| r.confidence).fold(0.0f32, f32::max);
        let mean_confidence = if matched.is_empty() {
            0.0
        } else {
            matched.iter().map(|r| r.confidence).sum::<f32>() / matched.len() as f32
        };
        let detection_rate = if n > 0 {
            detected as f64 / n as f64 * 100.0
        } else {
            0.0
        };

        let metrics = CountMetrics {
            expected: n,
            detected,
            count_error,
            tolerance: expected.tolerance,
            within_tolerance,
            detection_rate,
            false_positives: detected.saturating_sub(n),
            false_negatives: n.saturating_sub(detected),
            below_threshold: on_target - detected,
            max_confidence,
            mean_confidence,
        };

        let mut failure_reasons = Vec::new();

        // Absence: any match at all is a false positive, tolerance does not apply
        let discrepancy = if expected.expects_absence() {
            if detected > 0 {
                failure_reasons.push(format!(
                    "Expected no detections, but {} matched at confidence >= {:.2}",
                    detected, self.threshold
                ));
                Discrepancy::FalsePositive
            } else {
                Discrepancy::None
            }
        } else if !within_tolerance {
            failure_reasons.push(format!(
                "Count error {} exceeds ±{} tolerance (expected {}, detected {})",
                count_error, expected.tolerance, n, detected
            ));
            if detected < n {
                Discrepancy::FalseNegative
            } else {
                Discrepancy::FalsePositive
            }
        } else {
            let mut rate_failed = false;
            if let Some(floor) = expected.min_detection_rate {
                if detection_rate < floor {
                    rate_failed = true;
                    failure_reasons.push(format!(
                        "Detection rate {:.1}% below {:.0}% threshold",
                        detection_rate, floor
                    ));
                }
            }
            // Low mean confidence is reported but never changes the verdict
            if let Some(floor) = expected.min_mean_confidence {
                if detected > 0 && mean_confidence < floor {
                    failure_reasons.push(format!(
                        "Mean confidence {:.2} below {:.2} (warning)",
                        mean_confidence, floor
                    ));
                }
            }

            match (rate_failed, detected) {
                (false, _) => Discrepancy::None,
                // nothing found at all is a miss, not a miscount
                (true, 0) => Discrepancy::FalseNegative,
                (true, _) => Discrepancy::Miscount,
            }
        };

        let verdict = if discrepancy == Discrepancy::None {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        Ok(Evaluation {
            verdict,
            discrepancy,
            metrics,
            failure_reasons,
        })
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

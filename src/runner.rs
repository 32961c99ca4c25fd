use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::annotate;
use crate::detection::{DetectionResponse, Detector, DetectorError};
use crate::evaluation::{Discrepancy, Evaluation, Evaluator, Verdict};
use crate::fixtures::Fixture;
use crate::models::DetectionRecord;
use crate::report::{
    self, FailureInfo, FailureKind, OutputFiles, RunResult, RunStatus, RunSummary, Timing,
};

/// Lifecycle of one fixture inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl From<RunStatus> for FixtureState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => FixtureState::Completed,
            RunStatus::Failed => FixtureState::Failed,
            RunStatus::TimedOut => FixtureState::TimedOut,
        }
    }
}

/// Cloneable stop flag. Once triggered the runner starts no further fixture
/// and abandons the one in flight.
#[derive(Debug, Clone)]
pub struct Interrupt {
    flag: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { flag: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once the interrupt has been triggered
    pub async fn triggered(&self) {
        let mut rx = self.flag.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<RunResult>,
    pub summary: RunSummary,
    pub summary_path: Option<PathBuf>,
}

/// Sequential fixture runner
pub struct Runner<D: Detector> {
    detector: D,
    evaluator: Evaluator,
    timeout: Duration,
    output_dir: Option<PathBuf>,
    annotate: bool,
    verbose: bool,
    interrupt: Interrupt,
}

/// What happened to the detection call itself
enum CallOutcome {
    Answered(DetectionResponse),
    Failed(DetectorError),
    TimedOut,
}

impl<D: Detector> Runner<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            evaluator: Evaluator::default(),
            timeout: Duration::from_secs(30),
            output_dir: None,
            annotate: true,
            verbose: false,
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.evaluator = Evaluator::new(threshold);
        self
    }

    /// Wall-clock budget for one detection call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write result records, annotated images and the summary here.
    /// The directory is created if needed.
    pub fn with_output_dir(mut self, output_dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&output_dir)?;
        self.output_dir = Some(output_dir);
        Ok(self)
    }

    pub fn with_annotation(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    /// Print one progress line per fixture to stdout
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Run fixtures in order, one at a time, then compute and write the summary.
    /// A failing fixture never stops the run; only an interrupt or an output
    /// write error does.
    pub async fn run(&self, fixtures: &[(Fixture, PathBuf)]) -> anyhow::Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = report::now();
        let clock = Instant::now();
        let mut results = Vec::with_capacity(fixtures.len());
        let mut interrupted = false;

        info!(%run_id, fixtures = fixtures.len(), detector = self.detector.name(), "starting run");

        for (fixture, image_path) in fixtures {
            if self.interrupt.is_triggered() {
                interrupted = true;
                break;
            }
            match self.run_one(fixture, image_path).await? {
                Some(result) => results.push(result),
                None => {
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            warn!(completed = results.len(), total = fixtures.len(), "run interrupted");
        }

        let summary = RunSummary::from_results(run_id, &results, started_at, clock.elapsed(), interrupted);
        let summary_path = match &self.output_dir {
            Some(dir) => Some(report::write_summary(dir, &summary)?),
            None => None,
        };

        info!(
            %run_id,
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "run finished"
        );

        Ok(RunReport {
            results,
            summary,
            summary_path,
        })
    }

    /// Execute a single fixture and write its record. Returns None when the
    /// fixture was abandoned because of an interrupt; nothing is written then.
    pub async fn run_one(&self, fixture: &Fixture, image_path: &Path) -> anyhow::Result<Option<RunResult>> {
        let Some(result) = self.execute(fixture, image_path).await else {
            return Ok(None);
        };

        if let Some(dir) = &self.output_dir {
            report::write_result(dir, &result)?;
        }
        Ok(Some(result))
    }

    /// Drive one fixture through Pending → Running → {Completed, Failed, TimedOut}
    async fn execute(&self, fixture: &Fixture, image_path: &Path) -> Option<RunResult> {
        let id = fixture.id;
        let mut state = FixtureState::Pending;
        debug!(fixture = %id, ?state, image = %image_path.display());

        let started_at = report::now();
        let clock = Instant::now();
        state = FixtureState::Running;
        debug!(fixture = %id, ?state);

        let outcome = match tokio::fs::read(image_path).await {
            Ok(bytes) => {
                let call = tokio::time::timeout(self.timeout, self.detector.detect(&bytes));
                tokio::select! {
                    biased;
                    _ = self.interrupt.triggered() => {
                        warn!(fixture = %id, "interrupted while running; result discarded");
                        return None;
                    }
                    answer = call => match answer {
                        Ok(Ok(response)) => CallOutcome::Answered(response),
                        Ok(Err(DetectorError::Timeout(_))) | Err(_) => CallOutcome::TimedOut,
                        Ok(Err(err)) => CallOutcome::Failed(err),
                    },
                }
            }
            Err(err) => {
                let result = self.build_result(
                    fixture,
                    Built::failure(
                        RunStatus::Failed,
                        Discrepancy::None,
                        FailureKind::Image,
                        format!("Failed to read image {}: {}", image_path.display(), err),
                    ),
                    started_at,
                    clock.elapsed(),
                );
                self.log_result(&result);
                return Some(result);
            }
        };

        let built = match outcome {
            CallOutcome::Answered(response) => self.evaluate(fixture, response),
            CallOutcome::TimedOut => Built::failure(
                RunStatus::TimedOut,
                Discrepancy::None,
                FailureKind::Timeout,
                format!("timeout: no answer within {}", report::format_duration(self.timeout)),
            ),
            // unreadable answers count as a miss; transport/auth/quota do not classify
            CallOutcome::Failed(err @ DetectorError::Malformed(_)) => Built::failure(
                RunStatus::Failed,
                Discrepancy::FalseNegative,
                FailureKind::Malformed,
                err.to_string(),
            ),
            CallOutcome::Failed(err) => Built::failure(
                RunStatus::Failed,
                Discrepancy::None,
                FailureKind::from(&err),
                err.to_string(),
            ),
        };

        let mut result = self.build_result(fixture, built, started_at, clock.elapsed());

        if result.status == RunStatus::Completed && self.annotate {
            if let Some(dir) = &self.output_dir {
                let target = report::result_image_path(dir, &id);
                match annotate::write_annotated(image_path, &target, &result.matched_detections) {
                    Ok(()) => result.output_files.result_image = Some(target),
                    Err(err) => warn!(fixture = %id, error = %err, "annotation failed"),
                }
            }
        }

        state = FixtureState::from(result.status);
        debug!(fixture = %id, ?state);
        self.log_result(&result);
        Some(result)
    }

    fn evaluate(&self, fixture: &Fixture, response: DetectionResponse) -> Built {
        let latency = response.latency;
        match self.evaluator.evaluate(&response.records, &fixture.expected) {
            Ok(evaluation) => {
                let matched: Vec<DetectionRecord> = self
                    .evaluator
                    .matches(&response.records, &fixture.expected)
                    .cloned()
                    .collect();
                Built {
                    status: RunStatus::Completed,
                    evaluation: Some(evaluation),
                    discrepancy: None,
                    failure: None,
                    detections: response.records,
                    matched,
                    latency: Some(latency),
                }
            }
            Err(err) => Built {
                latency: Some(latency),
                detections: response.records,
                ..Built::failure(
                    RunStatus::Failed,
                    Discrepancy::FalseNegative,
                    FailureKind::Malformed,
                    err.to_string(),
                )
            },
        }
    }

    fn build_result(&self, fixture: &Fixture, built: Built, started_at: time::OffsetDateTime, elapsed: Duration) -> RunResult {
        let (verdict, discrepancy, failure_reasons, metrics) = match built.evaluation {
            Some(Evaluation {
                verdict,
                discrepancy,
                failure_reasons,
                metrics,
            }) => (verdict, discrepancy, failure_reasons, Some(metrics)),
            None => (
                Verdict::Fail,
                built.discrepancy.unwrap_or(Discrepancy::None),
                built
                    .failure
                    .as_ref()
                    .map(|f| vec![f.message.clone()])
                    .unwrap_or_default(),
                None,
            ),
        };

        let output_json = self
            .output_dir
            .as_deref()
            .map(|dir| report::result_json_path(dir, &fixture.id))
            .unwrap_or_default();

        RunResult {
            fixture_id: fixture.id,
            name: fixture.name.clone(),
            category: fixture.category(),
            category_name: fixture.category().description(),
            group: fixture.group,
            status: built.status,
            verdict,
            discrepancy,
            failure: built.failure,
            failure_reasons,
            expected: fixture.expected.clone(),
            confidence_threshold: self.evaluator.threshold(),
            metrics,
            detections: built.detections,
            matched_detections: built.matched,
            timing: Timing::new(started_at, started_at + elapsed, elapsed),
            latency_ms: built.latency.map(|l| l.as_millis() as u64),
            output_files: OutputFiles {
                result_image: None,
                output_json,
            },
        }
    }

    fn log_result(&self, result: &RunResult) {
        let expected = result.expected.count;
        let detected = result.detected();
        match &result.failure {
            None => info!(
                fixture = %result.fixture_id,
                verdict = ?result.verdict,
                discrepancy = result.discrepancy.as_str(),
                expected,
                detected,
                latency_ms = result.latency_ms,
                "fixture evaluated"
            ),
            Some(failure) => warn!(
                fixture = %result.fixture_id,
                kind = ?failure.kind,
                reason = %failure.message,
                "fixture failed"
            ),
        }

        if self.verbose {
            let symbol = if result.passed() { '✓' } else { '✗' };
            let status = match result.status {
                RunStatus::Completed if result.passed() => "PASS",
                RunStatus::Completed => "FAIL",
                RunStatus::Failed => "ERROR",
                RunStatus::TimedOut => "TIMEOUT",
            };
            println!(
                "TEST CASE {}: {} {} (Expected: {}, Detected: {})",
                result.fixture_id,
                status,
                symbol,
                expected,
                detected.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
            );
        }
    }
}

/// Intermediate per-fixture outcome before it becomes a [`RunResult`]
struct Built {
    status: RunStatus,
    evaluation: Option<Evaluation>,
    /// Classification used when there is no evaluation
    discrepancy: Option<Discrepancy>,
    failure: Option<FailureInfo>,
    detections: Vec<DetectionRecord>,
    matched: Vec<DetectionRecord>,
    latency: Option<Duration>,
}

impl Built {
    fn failure(status: RunStatus, discrepancy: Discrepancy, kind: FailureKind, message: String) -> Self {
        Self {
            status,
            evaluation: None,
            discrepancy: Some(discrepancy),
            failure: Some(FailureInfo { kind, message }),
            detections: Vec::new(),
            matched: Vec::new(),
            latency: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_shared_between_clones() {
        let a = Interrupt::new();
        let b = a.clone();
        assert!(!b.is_triggered());
        a.trigger();
        assert!(b.is_triggered());
    }

    #[tokio::test]
    async fn triggered_resolves_after_trigger() {
        let interrupt = Interrupt::new();
        let waiter = interrupt.clone();
        interrupt.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter.triggered())
            .await
            .unwrap();
    }

    #[test]
    fn terminal_states_map_from_status() {
        assert_eq!(FixtureState::from(RunStatus::Completed), FixtureState::Completed);
        assert_eq!(FixtureState::from(RunStatus::TimedOut), FixtureState::TimedOut);
    }
}

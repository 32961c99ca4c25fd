use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::detection::DetectorError;
use crate::evaluation::{CountMetrics, Discrepancy, Verdict};
use crate::fixtures::{Category, ExpectedOutcome, FixtureId, GroupSize};
use crate::models::DetectionRecord;

pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Terminal state of one fixture execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub const ALL: [RunStatus; 3] = [RunStatus::Completed, RunStatus::Failed, RunStatus::TimedOut];
}

/// Serializable tag for a per-fixture failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Auth,
    Quota,
    Timeout,
    Malformed,
    /// The fixture image could not be read
    Image,
}

impl From<&DetectorError> for FailureKind {
    fn from(err: &DetectorError) -> Self {
        match err {
            DetectorError::Network(_) => FailureKind::Network,
            DetectorError::Auth(_) => FailureKind::Auth,
            DetectorError::Quota(_) => FailureKind::Quota,
            DetectorError::Timeout(_) => FailureKind::Timeout,
            DetectorError::Malformed(_) => FailureKind::Malformed,
        }
    }
}

/// Why a fixture produced no usable evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timing {
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub duration_formatted: String,
}

impl Timing {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime, duration: Duration) -> Self {
        Self {
            start_time: timestamp(start),
            end_time: timestamp(end),
            duration_seconds: (duration.as_secs_f64() * 1000.0).round() / 1000.0,
            duration_formatted: format_duration(duration),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OutputFiles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_image: Option<PathBuf>,
    pub output_json: PathBuf,
}

/// Outcome of one fixture execution. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub fixture_id: FixtureId,
    pub name: String,
    pub category: Category,
    pub category_name: &'static str,
    pub group: GroupSize,
    pub status: RunStatus,
    pub verdict: Verdict,
    pub discrepancy: Discrepancy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub failure_reasons: Vec<String>,
    pub expected: ExpectedOutcome,
    pub confidence_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CountMetrics>,
    /// Every record the service returned
    pub detections: Vec<DetectionRecord>,
    /// Records that counted toward the expected outcome
    pub matched_detections: Vec<DetectionRecord>,
    pub timing: Timing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub output_files: OutputFiles,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Matched count, or None when the fixture never got an evaluation
    pub fn detected(&self) -> Option<u32> {
        self.metrics.as_ref().map(|m| m.detected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Tally {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Aggregate view over one run, recomputed from the result list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub interrupted: bool,
    pub by_category: BTreeMap<Category, Tally>,
    pub by_discrepancy: BTreeMap<Discrepancy, usize>,
    pub by_status: BTreeMap<RunStatus, usize>,
    pub started_at: String,
    pub finished_at: String,
    pub duration_seconds: f64,
    pub duration_formatted: String,
}

impl RunSummary {
    pub fn from_results(
        run_id: Uuid,
        results: &[RunResult],
        started_at: OffsetDateTime,
        elapsed: Duration,
        interrupted: bool,
    ) -> Self {
        let mut by_category: BTreeMap<Category, Tally> =
            Category::ALL.iter().map(|c| (*c, Tally::default())).collect();
        let mut by_discrepancy: BTreeMap<Discrepancy, usize> =
            Discrepancy::ALL.iter().map(|d| (*d, 0)).collect();
        let mut by_status: BTreeMap<RunStatus, usize> =
            RunStatus::ALL.iter().map(|s| (*s, 0)).collect();

        for result in results {
            let tally = by_category.entry(result.category).or_default();
            tally.total += 1;
            if result.passed() {
                tally.passed += 1;
            } else {
                tally.failed += 1;
            }
            *by_discrepancy.entry(result.discrepancy).or_default() += 1;
            *by_status.entry(result.status).or_default() += 1;
        }

        let total = results.len();
        let passed = results.iter().filter(|r| r.passed()).count();
        let pass_rate = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let finished_at = started_at + elapsed;

        Self {
            run_id,
            total,
            passed,
            failed: total - passed,
            pass_rate,
            interrupted,
            by_category,
            by_discrepancy,
            by_status,
            started_at: timestamp(started_at),
            finished_at: timestamp(finished_at),
            duration_seconds: (elapsed.as_secs_f64() * 1000.0).round() / 1000.0,
            duration_formatted: format_duration(elapsed),
        }
    }
}

/// Human-readable duration: `12.34ms`, `5.67s` or `2m 3.45s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 1.0 {
        return format!("{:.2}ms", secs * 1000.0);
    }

    // Round once, then split, so the seconds part never reads 60.00
    let centis = (secs * 100.0).round() as u64;
    let (minutes, centis) = (centis / 6000, centis % 6000);
    if minutes == 0 {
        format!("{}.{:02}s", centis / 100, centis % 100)
    } else {
        format!("{}m {}.{:02}s", minutes, centis / 100, centis % 100)
    }
}

/// Current wall-clock time, local offset when it can be determined
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn timestamp(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

pub fn result_json_path(dir: &Path, id: &FixtureId) -> PathBuf {
    dir.join(format!("{}_output.json", id))
}

pub fn result_image_path(dir: &Path, id: &FixtureId) -> PathBuf {
    dir.join(format!("{}_result.png", id))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write `<ID>_output.json` into `dir`
pub fn write_result(dir: &Path, result: &RunResult) -> anyhow::Result<PathBuf> {
    let path = result_json_path(dir, &result.fixture_id);
    write_json(&path, result)?;
    Ok(path)
}

/// Write `summary.json` into `dir`
pub fn write_summary(dir: &Path, summary: &RunSummary) -> anyhow::Result<PathBuf> {
    let path = dir.join(SUMMARY_FILE_NAME);
    write_json(&path, summary)?;
    Ok(path)
}

/// Results table as printed at the end of a run
pub fn render_table(results: &[RunResult], summary: &RunSummary) -> String {
    let rule = "-".repeat(72);
    let mut out = String::new();

    let _ = writeln!(out, "{:<10} {:<8} {:<10} {:<10} {:<16} {}", "Test ID", "Status", "Expected", "Detected", "Discrepancy", "Time");
    let _ = writeln!(out, "{}", rule);

    for r in results {
        let symbol = if r.passed() { '✓' } else { '✗' };
        let status = match (r.status, r.verdict) {
            (RunStatus::Completed, Verdict::Pass) => "PASS",
            (RunStatus::Completed, Verdict::Fail) => "FAIL",
            (RunStatus::Failed, _) => "ERROR",
            (RunStatus::TimedOut, _) => "TIMEOUT",
        };
        let detected = r.detected().map(|d| d.to_string()).unwrap_or_else(|| "-".into());
        let _ = writeln!(
            out,
            "{:<10} {} {:<6} {:<10} {:<10} {:<16} {}",
            r.fixture_id.to_string(),
            symbol,
            status,
            r.expected.count,
            detected,
            r.discrepancy.as_str(),
            r.timing.duration_formatted
        );
    }

    let _ = writeln!(out, "{}", rule);
    for (category, tally) in &summary.by_category {
        if tally.total > 0 {
            let _ = writeln!(
                out,
                "{:<4} {:<24} {}/{} passed",
                category.code(),
                category.description(),
                tally.passed,
                tally.total
            );
        }
    }
    let _ = writeln!(
        out,
        "Discrepancies: false_positive={} false_negative={} miscount={}",
        summary.by_discrepancy.get(&Discrepancy::FalsePositive).copied().unwrap_or(0),
        summary.by_discrepancy.get(&Discrepancy::FalseNegative).copied().unwrap_or(0),
        summary.by_discrepancy.get(&Discrepancy::Miscount).copied().unwrap_or(0),
    );
    let _ = writeln!(
        out,
        "Tests: {}/{} passed ({:.1}%)",
        summary.passed, summary.total, summary.pass_rate
    );
    let _ = writeln!(out, "Execution Time: {}", summary.duration_formatted);
    if summary.interrupted {
        let _ = writeln!(out, "Run was interrupted; remaining fixtures were not executed.");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ExpectedOutcome;

    fn result(id: &str, verdict: Verdict, discrepancy: Discrepancy, status: RunStatus) -> RunResult {
        let fixture_id: FixtureId = id.parse().unwrap();
        let start = OffsetDateTime::UNIX_EPOCH;
        RunResult {
            fixture_id,
            name: id.to_string(),
            category: fixture_id.category,
            category_name: fixture_id.category.description(),
            group: GroupSize::Individual,
            status,
            verdict,
            discrepancy,
            failure: None,
            failure_reasons: vec![],
            expected: ExpectedOutcome::no_people(),
            confidence_threshold: 0.5,
            metrics: None,
            detections: vec![],
            matched_detections: vec![],
            timing: Timing::new(start, start, Duration::from_millis(5)),
            latency_ms: None,
            output_files: OutputFiles::default(),
        }
    }

    #[test]
    fn formats_durations_by_magnitude() {
        assert_eq!(format_duration(Duration::from_micros(12_340)), "12.34ms");
        assert_eq!(format_duration(Duration::from_millis(5_670)), "5.67s");
        assert_eq!(format_duration(Duration::from_millis(123_450)), "2m 3.45s");
    }

    #[test]
    fn seconds_never_round_up_to_sixty() {
        assert_eq!(format_duration(Duration::from_millis(119_996)), "2m 0.00s");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "1m 0.00s");
        assert_eq!(format_duration(Duration::from_millis(60_000)), "1m 0.00s");
    }

    #[test]
    fn summary_counts_everything() {
        let results = vec![
            result("BVA-001", Verdict::Pass, Discrepancy::None, RunStatus::Completed),
            result("BVA-005", Verdict::Fail, Discrepancy::FalseNegative, RunStatus::Completed),
            result("EP-003", Verdict::Fail, Discrepancy::FalsePositive, RunStatus::Completed),
            result("DT-001", Verdict::Fail, Discrepancy::None, RunStatus::TimedOut),
        ];
        let summary = RunSummary::from_results(
            Uuid::new_v4(),
            &results,
            OffsetDateTime::UNIX_EPOCH,
            Duration::from_secs(3),
            false,
        );

        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.by_category[&Category::BoundaryValue], Tally { total: 2, passed: 1, failed: 1 });
        assert_eq!(summary.by_category[&Category::DecisionTable].failed, 1);
        assert_eq!(summary.by_discrepancy[&Discrepancy::FalseNegative], 1);
        assert_eq!(summary.by_discrepancy[&Discrepancy::Miscount], 0);
        assert_eq!(summary.by_status[&RunStatus::TimedOut], 1);
        assert!((summary.pass_rate - 25.0).abs() < 1e-9);
        assert_eq!(summary.duration_formatted, "3.00s");
    }

    #[test]
    fn summary_serializes_with_string_keys() {
        let summary = RunSummary::from_results(
            Uuid::nil(),
            &[],
            OffsetDateTime::UNIX_EPOCH,
            Duration::ZERO,
            true,
        );
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["by_category"]["EP"]["total"], 0);
        assert_eq!(json["by_discrepancy"]["false_positive"], 0);
        assert_eq!(json["started_at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["interrupted"], true);
    }

    #[test]
    fn table_lists_each_fixture() {
        let results = vec![
            result("BVA-001", Verdict::Pass, Discrepancy::None, RunStatus::Completed),
            result("EP-003", Verdict::Fail, Discrepancy::None, RunStatus::Failed),
        ];
        let summary = RunSummary::from_results(
            Uuid::nil(),
            &results,
            OffsetDateTime::UNIX_EPOCH,
            Duration::from_millis(10),
            false,
        );
        let table = render_table(&results, &summary);
        assert!(table.contains("BVA-001"));
        assert!(table.contains("ERROR"));
        assert!(table.contains("Tests: 1/2 passed (50.0%)"));
    }
}

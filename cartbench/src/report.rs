//! Run artifacts and console summaries.
//!
//! A run artifact is the ordered list of all outcome records of a run, keyed by the backend label
//! and a run identifier. Consistency runs also persist their visibility observations and lost
//! updates. Latencies and delays are persisted in milliseconds, rounded to 0.01ms.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yansi::Paint;

use crate::compare::{self, CategoryDelta, Comparison, LostUpdateCount};
use crate::concurrent::ConcurrentReport;
use crate::error::{Error, Result};
use crate::outcome::{Operation, OutcomeRecord};
use crate::performance::PerformanceRun;
use crate::probe::ProbeReport;
use crate::stats::{self, AggregateStats, LatencySummary};
use crate::timer::round_millis;

/// A single persisted outcome record.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecordEntry {
    pub operation: Operation,
    /// Latency in milliseconds.
    pub response_time: f64,
    pub success: bool,
    pub status_code: u16,
    #[serde(with = "humantime_serde")]
    pub timestamp: SystemTime,
}

impl From<&OutcomeRecord> for RecordEntry {
    fn from(record: &OutcomeRecord) -> Self {
        Self {
            operation: record.operation(),
            response_time: round_millis(record.latency()),
            success: record.succeeded(),
            status_code: record.status_code(),
            timestamp: record.observed_at(),
        }
    }
}

/// A persisted visibility observation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ObservationEntry {
    #[serde(with = "humantime_serde")]
    pub write_time: SystemTime,
    pub visible: bool,
    /// Visibility delay in milliseconds, absent if the write never became visible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_delay: Option<f64>,
    pub attempts: u32,
}

/// The persisted visibility window of one consistency check.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VisibilityEntry {
    pub iterations: usize,
    pub write_failures: usize,
    pub observations: Vec<ObservationEntry>,
}

impl From<&ProbeReport> for VisibilityEntry {
    fn from(report: &ProbeReport) -> Self {
        Self {
            iterations: report.iterations,
            write_failures: report.write_failures,
            observations: report
                .observations
                .iter()
                .map(|observation| ObservationEntry {
                    write_time: observation.write_time,
                    visible: observation.visible,
                    visibility_delay: observation.visibility_delay.map(round_millis),
                    attempts: observation.attempts,
                })
                .collect(),
        }
    }
}

impl VisibilityEntry {
    /// Aggregates the window like an operation.
    ///
    /// Every iteration counts, a success is a write that became visible, and the latency is the
    /// visibility delay.
    pub fn stats(&self) -> Result<AggregateStats, String> {
        let delays = self
            .observations
            .iter()
            .filter_map(|observation| observation.visibility_delay)
            .map(|delay| Duration::try_from_secs_f64(delay / 1000.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| err.to_string())?;

        Ok(AggregateStats {
            count: self.iterations,
            success_count: self.observations.iter().filter(|o| o.visible).count(),
            latency: LatencySummary::from_durations(delays),
        })
    }
}

/// The persisted outcome of the concurrent-update test.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConcurrentEntry {
    pub cart_id: String,
    pub workers: usize,
    pub expected: u64,
    pub acknowledged: u64,
    pub observed: Option<u64>,
    pub delta: Option<i64>,
}

impl From<&ConcurrentReport> for ConcurrentEntry {
    fn from(report: &ConcurrentReport) -> Self {
        Self {
            cart_id: report.cart_id.clone(),
            workers: report.workers,
            expected: report.expected,
            acknowledged: report.acknowledged,
            observed: report.observed,
            delta: report.delta(),
        }
    }
}

impl ConcurrentEntry {
    pub fn lost_updates(&self) -> LostUpdateCount {
        LostUpdateCount {
            expected: self.expected,
            delta: self.delta,
        }
    }
}

/// Findings of a consistency run beyond its individual calls.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ConsistencyFindings {
    /// Visibility windows keyed by the name of the consistency check.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub visibility: BTreeMap<String, VisibilityEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<ConcurrentEntry>,
}

impl ConsistencyFindings {
    pub fn is_empty(&self) -> bool {
        self.visibility.is_empty() && self.concurrent.is_none()
    }
}

/// The persisted result of one run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RunArtifact {
    pub run_id: Uuid,
    pub backend: String,
    #[serde(with = "humantime_serde")]
    pub started_at: SystemTime,
    pub records: Vec<RecordEntry>,
    #[serde(default, skip_serializing_if = "ConsistencyFindings::is_empty")]
    pub consistency: ConsistencyFindings,
}

/// Artifacts written as a bare list of records carry no header.
#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactFile {
    Run(RunArtifact),
    Records(Vec<RecordEntry>),
}

impl RunArtifact {
    /// Creates an artifact for a new run.
    pub fn new(backend: impl Into<String>, started_at: SystemTime, records: &[OutcomeRecord]) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            backend: backend.into(),
            started_at,
            records: records.iter().map(RecordEntry::from).collect(),
            consistency: ConsistencyFindings::default(),
        }
    }

    /// Appends records to the artifact.
    pub fn extend(&mut self, records: &[OutcomeRecord]) {
        self.records.extend(records.iter().map(RecordEntry::from));
    }

    /// Adds the calls and the visibility window of a consistency check.
    pub fn record_visibility(&mut self, name: &str, report: &ProbeReport) {
        self.extend(&report.records);
        self.consistency
            .visibility
            .insert(name.to_owned(), VisibilityEntry::from(report));
    }

    /// Adds the calls and the lost updates of the concurrent-update test.
    pub fn record_concurrent(&mut self, report: &ConcurrentReport) {
        self.extend(&report.records);
        self.extend(std::slice::from_ref(&report.final_read));
        self.consistency.concurrent = Some(ConcurrentEntry::from(report));
    }

    /// The default location of an artifact of the given kind.
    pub fn path(output_dir: &Path, backend: &str, kind: &str) -> PathBuf {
        output_dir.join(format!("{backend}_{kind}_results.json"))
    }

    /// Writes the artifact as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads an artifact.
    ///
    /// A bare list of records is accepted as well. Its backend label is taken from the file name,
    /// so `mysql_test_results.json` reads as `mysql`.
    pub fn read(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let file: ArtifactFile = serde_json::from_reader(reader)?;
        let artifact = match file {
            ArtifactFile::Run(artifact) => artifact,
            ArtifactFile::Records(records) => {
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let backend = ["_test_results", "_consistency_results"]
                    .iter()
                    .find_map(|suffix| stem.strip_suffix(suffix))
                    .unwrap_or(stem.as_str())
                    .to_owned();
                let started_at = records
                    .iter()
                    .map(|r| r.timestamp)
                    .min()
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Self {
                    run_id: Uuid::nil(),
                    backend,
                    started_at,
                    records,
                    consistency: ConsistencyFindings::default(),
                }
            }
        };

        // Validate eagerly so a broken artifact fails before any comparison is printed.
        artifact
            .outcome_records()
            .and_then(|_| artifact.visibility_stats())
            .map_err(|reason| Error::InvalidArtifact {
                path: path.to_owned(),
                reason,
            })?;

        Ok(artifact)
    }

    /// Converts the persisted entries back into outcome records.
    pub fn outcome_records(&self) -> Result<Vec<OutcomeRecord>, String> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let latency = Duration::try_from_secs_f64(entry.response_time / 1000.0)
                    .map_err(|err| format!("record {index}: {err}"))?;
                Ok(OutcomeRecord::restore(
                    entry.operation,
                    latency,
                    entry.success,
                    entry.status_code,
                    entry.timestamp,
                ))
            })
            .collect()
    }

    /// Aggregates the artifact's records per operation.
    pub fn aggregate(&self) -> Result<BTreeMap<Operation, AggregateStats>, String> {
        Ok(stats::aggregate(&self.outcome_records()?))
    }

    /// Aggregates the visibility windows per consistency check.
    pub fn visibility_stats(&self) -> Result<BTreeMap<String, AggregateStats>, String> {
        self.consistency
            .visibility
            .iter()
            .map(|(name, entry)| {
                let stats = entry.stats().map_err(|err| format!("{name}: {err}"))?;
                Ok((name.clone(), stats))
            })
            .collect()
    }

    /// Compares this run, as the baseline, with a candidate run.
    pub fn compare(&self, candidate: &RunArtifact) -> Result<Comparison, String> {
        let lost_updates = |artifact: &RunArtifact| {
            artifact
                .consistency
                .concurrent
                .as_ref()
                .map(ConcurrentEntry::lost_updates)
        };

        Ok(compare::compare(
            self.backend.as_str(),
            &self.aggregate()?,
            candidate.backend.as_str(),
            &candidate.aggregate()?,
        )
        .with_visibility(&self.visibility_stats()?, &candidate.visibility_stats()?)
        .with_lost_updates(lost_updates(self), lost_updates(candidate)))
    }
}

fn fmt_ms(duration: Duration) -> String {
    format!("{:.2}ms", round_millis(duration))
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn print_latency(latency: &LatencySummary) {
    println!(
        "  avg: {}; min: {}; max: {}",
        fmt_ms(latency.mean).bold(),
        fmt_ms(latency.min),
        fmt_ms(latency.max)
    );
    println!(
        "  p50: {}; p95: {}; p99: {}",
        fmt_ms(latency.p50),
        fmt_ms(latency.p95),
        fmt_ms(latency.p99)
    );
}

fn print_stats(operation: Operation, stats: &AggregateStats) {
    print!(
        "{} ({} ops",
        format!("{}:", operation.as_str().to_uppercase()).bold().green(),
        stats.count.bold()
    );
    if stats.failure_count() > 0 {
        print!(
            ", {}",
            format!(
                "{} FAILURES ({:.1}%)",
                stats.failure_count(),
                percent(stats.failure_count(), stats.count)
            )
            .bold()
            .red()
        );
    }
    println!(")");
    println!(
        "  success: {}/{} ({:.1}%)",
        stats.success_count,
        stats.count,
        percent(stats.success_count, stats.count)
    );
    if let Some(latency) = &stats.latency {
        print_latency(latency);
    }
}

/// Prints the totals and per-operation statistics of a sequential run.
pub fn print_summary(label: &str, run: &PerformanceRun, time_limit: Duration) {
    let records = &run.records;
    let total = records.len();
    let successes = records.iter().filter(|r| r.succeeded()).count();
    let failures = total - successes;

    println!();
    println!("{} {}", "## Summary".bold(), label.bold().blue());
    println!("  total operations: {}", total.bold());
    println!(
        "  successful: {} ({:.1}%)",
        successes.green(),
        percent(successes, total)
    );
    let failed = format!("{failures} ({:.1}%)", percent(failures, total));
    if failures > 0 {
        println!("  failed: {}", failed.red());
    } else {
        println!("  failed: {failed}");
    }
    println!("  duration: {:.2}s", run.duration.as_secs_f64());
    if run.within_time_limit(time_limit) {
        println!("  time limit ({time_limit:?}): {}", "PASSED".bold().green());
    } else {
        println!("  time limit ({time_limit:?}): {}", "EXCEEDED".bold().red());
    }

    for (operation, stats) in stats::aggregate(records) {
        println!();
        print_stats(operation, &stats);
    }
}

/// Prints the findings of a consistency probe.
pub fn print_probe(name: &str, report: &ProbeReport) {
    println!();
    println!("{} {}", "## Probe".bold(), name.bold().blue());

    let inconsistencies = report.inconsistencies();
    let line = format!(
        "{inconsistencies}/{} ({:.1}%)",
        report.iterations,
        report.inconsistency_rate().unwrap_or(0.0) * 100.0
    );
    if inconsistencies > 0 {
        println!("  inconsistencies: {}", line.bold().red());
    } else {
        println!("  inconsistencies: {}", line.bold().green());
    }
    if report.write_failures > 0 {
        println!(
            "  {}",
            format!("{} WRITE FAILURES (iterations abandoned)", report.write_failures)
                .bold()
                .red()
        );
    }

    match report.delay_summary() {
        Some(delays) => {
            println!(
                "  visibility delay avg: {}; min: {}; max: {}; p95: {}",
                fmt_ms(delays.mean).bold(),
                fmt_ms(delays.min),
                fmt_ms(delays.max),
                fmt_ms(delays.p95)
            );
        }
        None => println!("  no write became visible"),
    }
}

/// Prints the one-line summary of a phase that could not start.
pub fn print_aborted(name: &str, reason: &dyn std::fmt::Display) {
    println!();
    println!("{} {}", "## Phase".bold(), name.bold().blue());
    println!(
        "  {}",
        format!("phase aborted: 0 observations ({reason})")
            .bold()
            .red()
    );
}

/// Prints the findings of the concurrent-update test.
pub fn print_concurrent(report: &ConcurrentReport) {
    println!();
    println!(
        "{} (cart: {}, workers: {})",
        "## Concurrent updates".bold(),
        report.cart_id.blue(),
        report.workers.bold()
    );
    println!("  workers finished in {:.2}s", report.elapsed.as_secs_f64());
    println!("  expected items: {}", report.expected.bold());
    println!("  acknowledged: {}", report.acknowledged);

    match (report.observed, report.delta()) {
        (Some(observed), Some(delta)) => {
            println!("  observed items: {}", observed.bold());
            let line = format!(
                "{delta} ({:.1}%)",
                delta as f64 / report.expected.max(1) as f64 * 100.0
            );
            match delta {
                0 => println!("  lost updates: {}", line.green()),
                d if d > 0 => println!("  lost updates: {}", line.bold().red()),
                _ => println!("  lost updates: {} (over-count)", line.bold().yellow()),
            }
        }
        _ => println!(
            "  {}",
            format!(
                "final read failed with status {}",
                report.final_read.status_code()
            )
            .bold()
            .red()
        ),
    }
}

fn fmt_opt_ms(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.2}ms"),
        None => "-".to_owned(),
    }
}

fn fmt_opt_rate(value: Option<f64>) -> String {
    match value {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => "-".to_owned(),
    }
}

fn print_delta(title: &str, metric: &str, delta: &CategoryDelta) {
    println!();
    println!("{}", format!("{title}:").bold().green());
    println!(
        "  {metric}: {} -> {}",
        fmt_opt_ms(delta.baseline_mean),
        fmt_opt_ms(delta.candidate_mean)
    );
    match (delta.delta, delta.relative_percent()) {
        (Some(d), Some(rel)) => println!("  delta: {}", format!("{d:+.2}ms ({rel:+.1}%)").bold()),
        (Some(d), None) => println!("  delta: {d:+.2}ms (relative undefined)"),
        _ => println!("  delta: undefined"),
    }
    if let Some(flag) = delta.flag {
        println!("  {}", format!("{flag:?}").yellow());
    }
}

fn fmt_lost(count: &LostUpdateCount) -> String {
    match count.delta {
        Some(delta) => format!("{delta}/{}", count.expected),
        None => format!("?/{}", count.expected),
    }
}

/// Prints a comparison of two runs.
pub fn print_comparison(comparison: &Comparison) {
    println!();
    println!(
        "{} {} {} {}",
        "## Comparison".bold(),
        comparison.baseline.bold().blue(),
        "vs".dim(),
        comparison.candidate.bold().blue()
    );

    let operations = &comparison.operations;
    for (operation, delta) in &operations.matched {
        print_delta(&operation.as_str().to_uppercase(), "mean", delta);
    }
    for operation in &operations.baseline_only {
        println!("{} only in {}", operation.yellow(), comparison.baseline);
    }
    for operation in &operations.candidate_only {
        println!("{} only in {}", operation.yellow(), comparison.candidate);
    }

    let visibility = &comparison.visibility;
    for (name, delta) in &visibility.matched {
        print_delta(&format!("VISIBILITY {}", name.to_uppercase()), "mean delay", delta);
        println!(
            "  visible: {} -> {}",
            fmt_opt_rate(delta.baseline_success_rate),
            fmt_opt_rate(delta.candidate_success_rate)
        );
    }
    for name in &visibility.baseline_only {
        println!("{} only in {}", name.yellow(), comparison.baseline);
    }
    for name in &visibility.candidate_only {
        println!("{} only in {}", name.yellow(), comparison.candidate);
    }

    if let Some(lost) = &comparison.lost_updates {
        println!();
        println!("{}", "LOST UPDATES:".bold().green());
        println!(
            "  lost: {} -> {}",
            fmt_lost(&lost.baseline),
            fmt_lost(&lost.candidate)
        );
    }
}

/// Writes a comparison as pretty-printed JSON.
pub fn write_comparison(comparison: &Comparison, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, comparison)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::probe::ConsistencyObservation;

    fn visibility_report(delays_ms: &[Option<u64>], write_failures: usize) -> ProbeReport {
        let created = OutcomeRecord::from_status(
            Operation::CreateCart,
            Duration::from_millis(5),
            StatusCode::CREATED,
        );
        ProbeReport {
            iterations: delays_ms.len() + write_failures,
            write_failures,
            observations: delays_ms
                .iter()
                .map(|delay| ConsistencyObservation {
                    write_time: SystemTime::now(),
                    visible: delay.is_some(),
                    visibility_delay: delay.map(Duration::from_millis),
                    attempts: if delay.is_some() { 2 } else { 10 },
                })
                .collect(),
            records: vec![created; delays_ms.len() + write_failures],
        }
    }

    #[test]
    fn persists_rounded_milliseconds() {
        let records = vec![
            OutcomeRecord::from_status(
                Operation::CreateCart,
                Duration::from_micros(45_504),
                StatusCode::CREATED,
            ),
            OutcomeRecord::transport_failure(Operation::GetCart, Duration::from_secs(10)),
        ];
        let artifact = RunArtifact::new("mysql", SystemTime::now(), &records);

        let json = serde_json::to_value(&artifact).unwrap();
        let first = &json["records"][0];
        assert_eq!(first["operation"], "create_cart");
        assert_eq!(first["response_time"], 45.5);
        assert_eq!(first["success"], true);
        assert_eq!(first["status_code"], 201);
        assert!(first["timestamp"].as_str().unwrap().ends_with('Z'));

        let second = &json["records"][1];
        assert_eq!(second["status_code"], 0);
        assert_eq!(second["success"], false);
        assert!(json.get("consistency").is_none());
    }

    #[test]
    fn reads_back_written_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunArtifact::path(dir.path(), "dynamodb", "test");
        assert!(path.ends_with("dynamodb_test_results.json"));

        let records = vec![
            OutcomeRecord::from_status(Operation::GetCart, Duration::from_millis(40), StatusCode::OK),
            OutcomeRecord::from_status(
                Operation::GetCart,
                Duration::from_millis(60),
                StatusCode::NOT_FOUND,
            ),
        ];
        RunArtifact::new("dynamodb", SystemTime::now(), &records)
            .write(&path)
            .unwrap();

        let artifact = RunArtifact::read(&path).unwrap();
        assert_eq!(artifact.backend, "dynamodb");

        let stats = artifact.aggregate().unwrap();
        let get = stats[&Operation::GetCart];
        assert_eq!(get.count, 2);
        assert_eq!(get.success_count, 1);
        assert_eq!(get.mean(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn reads_bare_record_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql_test_results.json");
        std::fs::write(
            &path,
            r#"[
                {"operation": "create_cart", "response_time": 45.5, "success": true,
                 "status_code": 201, "timestamp": "2025-01-19T10:00:00.123456Z"},
                {"operation": "get_cart", "response_time": 12.25, "success": true,
                 "status_code": 200, "timestamp": "2025-01-19T10:00:01Z", "backend": "mysql"}
            ]"#,
        )
        .unwrap();

        let artifact = RunArtifact::read(&path).unwrap();
        assert_eq!(artifact.backend, "mysql");
        assert_eq!(artifact.run_id, Uuid::nil());
        assert_eq!(artifact.records.len(), 2);

        let records = artifact.outcome_records().unwrap();
        assert_eq!(records[1].latency(), Duration::from_micros(12_250));
    }

    #[test]
    fn rejects_negative_latencies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(
            &path,
            r#"[{"operation": "get_cart", "response_time": -1.0, "success": true,
                 "status_code": 200, "timestamp": "2025-01-19T10:00:00Z"}]"#,
        )
        .unwrap();

        let err = RunArtifact::read(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact { .. }), "{err}");
    }

    #[test]
    fn persists_consistency_findings() {
        let dir = tempfile::tempdir().unwrap();
        let concurrent = ConcurrentReport {
            cart_id: "shared".into(),
            workers: 5,
            expected: 25,
            acknowledged: 25,
            observed: Some(22),
            elapsed: Duration::from_millis(80),
            records: vec![
                OutcomeRecord::from_status(
                    Operation::AddItem,
                    Duration::from_millis(3),
                    StatusCode::CREATED,
                );
                25
            ],
            final_read: OutcomeRecord::from_status(
                Operation::GetCart,
                Duration::from_millis(2),
                StatusCode::OK,
            ),
        };

        let mut artifact = RunArtifact::new("mysql", SystemTime::now(), &[]);
        artifact.record_visibility(
            "read_after_create",
            &visibility_report(&[Some(250), Some(750), None], 1),
        );
        artifact.record_concurrent(&concurrent);
        assert_eq!(artifact.records.len(), 4 + 25 + 1);

        let path = RunArtifact::path(dir.path(), "mysql", "consistency");
        artifact.write(&path).unwrap();
        let artifact = RunArtifact::read(&path).unwrap();

        let stats = artifact.visibility_stats().unwrap();
        let window = stats["read_after_create"];
        assert_eq!(window.count, 4);
        assert_eq!(window.success_count, 2);
        assert_eq!(window.success_rate(), Some(0.5));
        assert_eq!(window.mean(), Some(Duration::from_millis(500)));

        let entry = &artifact.consistency.visibility["read_after_create"];
        assert_eq!(entry.write_failures, 1);
        assert_eq!(entry.observations[2].visibility_delay, None);
        assert_eq!(entry.observations[2].attempts, 10);

        let concurrent = artifact.consistency.concurrent.as_ref().unwrap();
        assert_eq!(concurrent.observed, Some(22));
        assert_eq!(concurrent.delta, Some(3));

        let operations = artifact.aggregate().unwrap();
        assert_eq!(operations[&Operation::AddItem].count, 25);
        assert_eq!(operations[&Operation::GetCart].count, 1);
    }

    #[test]
    fn compares_visibility_of_two_runs() {
        let mut baseline = RunArtifact::new("mysql", SystemTime::now(), &[]);
        baseline.record_visibility("read_after_create", &visibility_report(&[Some(250)], 0));
        let mut candidate = RunArtifact::new("dynamodb", SystemTime::now(), &[]);
        candidate.record_visibility(
            "read_after_create",
            &visibility_report(&[Some(750), None], 0),
        );
        candidate.record_visibility("add_item_visibility", &visibility_report(&[Some(1)], 0));

        let comparison = baseline.compare(&candidate).unwrap();

        let window = &comparison.visibility.matched["read_after_create"];
        assert_eq!(window.delta, Some(500.0));
        assert_eq!(window.relative, Some(2.0));
        assert_eq!(window.baseline_success_rate, Some(1.0));
        assert_eq!(window.candidate_success_rate, Some(0.5));
        assert_eq!(comparison.visibility.candidate_only, vec!["add_item_visibility"]);
        assert!(comparison.operations.matched.contains_key(&Operation::CreateCart));
        assert_eq!(comparison.lost_updates, None);
    }

    #[test]
    fn rejects_negative_visibility_delays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(
            &path,
            r#"{"run_id": "00000000-0000-0000-0000-000000000000", "backend": "mysql",
                "started_at": "2025-01-19T10:00:00Z", "records": [],
                "consistency": {"visibility": {"read_after_create": {
                    "iterations": 1, "write_failures": 0,
                    "observations": [{"write_time": "2025-01-19T10:00:00Z", "visible": true,
                                      "visibility_delay": -3.0, "attempts": 1}]}}}}"#,
        )
        .unwrap();

        let err = RunArtifact::read(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact { .. }), "{err}");
    }
}

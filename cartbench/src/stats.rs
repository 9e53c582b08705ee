//! Aggregation of outcome records into per-operation latency statistics.
//!
//! Percentiles use nearest-rank selection over the fully sorted sample: the value at index
//! `floor(q * count)`, clamped to the last element. Runs are bounded to a few hundred samples per
//! operation, so the exact computation is always affordable.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::outcome::{Operation, OutcomeRecord};

/// Latency distribution of a non-empty sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySummary {
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    /// Computes the summary of a sample, or `None` if the sample is empty.
    pub fn from_durations(durations: impl IntoIterator<Item = Duration>) -> Option<Self> {
        let mut sorted: Vec<_> = durations.into_iter().collect();
        sorted.sort_unstable();

        let (&min, &max) = (sorted.first()?, sorted.last()?);
        let total: Duration = sorted.iter().sum();
        let mean = match u32::try_from(sorted.len()) {
            Ok(count) => total / count,
            Err(_) => total.div_f64(sorted.len() as f64),
        };

        Some(Self {
            mean,
            min,
            max,
            p50: nearest_rank(&sorted, 0.50)?,
            p95: nearest_rank(&sorted, 0.95)?,
            p99: nearest_rank(&sorted, 0.99)?,
        })
    }
}

/// Selects the nearest-rank quantile `q` of an ascending sample.
pub fn nearest_rank(sorted: &[Duration], q: f64) -> Option<Duration> {
    let last = sorted.len().checked_sub(1)?;
    let index = (q * sorted.len() as f64).floor() as usize;
    Some(sorted[index.min(last)])
}

/// Statistics of a single operation category.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregateStats {
    pub count: usize,
    pub success_count: usize,
    /// Absent when there is no latency sample.
    pub latency: Option<LatencySummary>,
}

impl AggregateStats {
    /// Aggregates all records, regardless of their operation.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OutcomeRecord>) -> Self {
        let mut count = 0;
        let mut success_count = 0;
        let mut latencies = Vec::new();

        for record in records {
            count += 1;
            if record.succeeded() {
                success_count += 1;
            }
            latencies.push(record.latency());
        }

        Self {
            count,
            success_count,
            latency: LatencySummary::from_durations(latencies),
        }
    }

    pub fn failure_count(&self) -> usize {
        self.count - self.success_count
    }

    /// Share of successful operations in `[0, 1]`, absent without observations.
    pub fn success_rate(&self) -> Option<f64> {
        (self.count > 0).then(|| self.success_count as f64 / self.count as f64)
    }

    pub fn mean(&self) -> Option<Duration> {
        self.latency.map(|l| l.mean)
    }
}

/// Partitions records by operation and aggregates each partition.
///
/// Only operations with at least one record appear in the result.
pub fn aggregate(records: &[OutcomeRecord]) -> BTreeMap<Operation, AggregateStats> {
    let mut partitions: BTreeMap<Operation, Vec<&OutcomeRecord>> = BTreeMap::new();
    for record in records {
        partitions.entry(record.operation()).or_default().push(record);
    }

    partitions
        .into_iter()
        .map(|(operation, records)| (operation, AggregateStats::from_records(records)))
        .collect()
}

/// Aggregates the records of a single operation, reporting an empty result if there are none.
pub fn aggregate_operation(records: &[OutcomeRecord], operation: Operation) -> AggregateStats {
    AggregateStats::from_records(records.iter().filter(|r| r.operation() == operation))
}

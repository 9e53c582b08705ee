//! Comparison of two aggregated runs, typically of two storage backends.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::outcome::Operation;
use crate::stats::AggregateStats;
use crate::timer::as_millis_f64;

/// Why a relative difference could not be computed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaFlag {
    /// The baseline has no observations for this operation.
    EmptyBaseline,
    /// The candidate has no observations for this operation.
    EmptyCandidate,
    /// The baseline mean is zero, so any relative change is undefined.
    ZeroBaseline,
}

/// Difference of mean latencies for one operation present in both runs.
///
/// Latencies are in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryDelta {
    pub baseline_mean: Option<f64>,
    pub candidate_mean: Option<f64>,
    /// `candidate_mean - baseline_mean`.
    pub delta: Option<f64>,
    /// `delta / baseline_mean`, as a fraction.
    pub relative: Option<f64>,
    pub baseline_success_rate: Option<f64>,
    pub candidate_success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<DeltaFlag>,
}

impl CategoryDelta {
    /// Compares the stats of one operation.
    pub fn new(baseline: &AggregateStats, candidate: &AggregateStats) -> Self {
        let baseline_mean = baseline.mean().map(as_millis_f64);
        let candidate_mean = candidate.mean().map(as_millis_f64);

        let (delta, relative, flag) = match (baseline_mean, candidate_mean) {
            (None, _) => (None, None, Some(DeltaFlag::EmptyBaseline)),
            (Some(_), None) => (None, None, Some(DeltaFlag::EmptyCandidate)),
            (Some(base), Some(cand)) => {
                let delta = cand - base;
                if base == 0.0 {
                    (Some(delta), None, Some(DeltaFlag::ZeroBaseline))
                } else {
                    (Some(delta), Some(delta / base), None)
                }
            }
        };

        Self {
            baseline_mean,
            candidate_mean,
            delta,
            relative,
            baseline_success_rate: baseline.success_rate(),
            candidate_success_rate: candidate.success_rate(),
            flag,
        }
    }

    /// The relative difference in percent.
    pub fn relative_percent(&self) -> Option<f64> {
        self.relative.map(|r| r * 100.0)
    }
}

/// Matched and unmatched categories of one kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryComparison<K> {
    /// Categories present in both runs.
    pub matched: BTreeMap<K, CategoryDelta>,
    /// Categories only the baseline observed.
    pub baseline_only: Vec<K>,
    /// Categories only the candidate observed.
    pub candidate_only: Vec<K>,
}

impl<K: Ord + Clone> CategoryComparison<K> {
    /// Matches the categories of two aggregated runs by key.
    pub fn new(
        baseline: &BTreeMap<K, AggregateStats>,
        candidate: &BTreeMap<K, AggregateStats>,
    ) -> Self {
        let mut matched = BTreeMap::new();
        let mut baseline_only = Vec::new();

        for (key, base) in baseline {
            match candidate.get(key) {
                Some(cand) => {
                    matched.insert(key.clone(), CategoryDelta::new(base, cand));
                }
                None => baseline_only.push(key.clone()),
            }
        }

        let candidate_only = candidate
            .keys()
            .filter(|key| !baseline.contains_key(key))
            .cloned()
            .collect();

        Self {
            matched,
            baseline_only,
            candidate_only,
        }
    }
}

impl<K> CategoryComparison<K> {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty() && self.baseline_only.is_empty() && self.candidate_only.is_empty()
    }
}

impl<K> Default for CategoryComparison<K> {
    fn default() -> Self {
        Self {
            matched: BTreeMap::new(),
            baseline_only: Vec::new(),
            candidate_only: Vec::new(),
        }
    }
}

/// Lost updates of one concurrent-update test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct LostUpdateCount {
    pub expected: u64,
    /// `expected - observed`, absent if the final read failed.
    pub delta: Option<i64>,
}

/// Lost updates of both runs side by side.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct LostUpdates {
    pub baseline: LostUpdateCount,
    pub candidate: LostUpdateCount,
}

/// Comparison of a baseline and a candidate run.
///
/// Operations are compared by mean latency. Visibility windows are compared by mean visibility
/// delay, and their success rate is the share of writes that became visible.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Comparison {
    pub baseline: String,
    pub candidate: String,
    #[serde(flatten)]
    pub operations: CategoryComparison<Operation>,
    /// Visibility windows keyed by the name of the consistency check.
    #[serde(skip_serializing_if = "CategoryComparison::is_empty")]
    pub visibility: CategoryComparison<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lost_updates: Option<LostUpdates>,
}

impl Comparison {
    /// Adds the visibility windows of both runs.
    pub fn with_visibility(
        mut self,
        baseline: &BTreeMap<String, AggregateStats>,
        candidate: &BTreeMap<String, AggregateStats>,
    ) -> Self {
        self.visibility = CategoryComparison::new(baseline, candidate);
        self
    }

    /// Adds the lost updates if both runs include a concurrent-update test.
    pub fn with_lost_updates(
        mut self,
        baseline: Option<LostUpdateCount>,
        candidate: Option<LostUpdateCount>,
    ) -> Self {
        self.lost_updates = baseline
            .zip(candidate)
            .map(|(baseline, candidate)| LostUpdates {
                baseline,
                candidate,
            });
        self
    }
}

/// Compares two aggregated runs operation by operation.
///
/// Operations that appear on only one side are listed as unmatched.
pub fn compare(
    baseline_label: impl Into<String>,
    baseline: &BTreeMap<Operation, AggregateStats>,
    candidate_label: impl Into<String>,
    candidate: &BTreeMap<Operation, AggregateStats>,
) -> Comparison {
    Comparison {
        baseline: baseline_label.into(),
        candidate: candidate_label.into(),
        operations: CategoryComparison::new(baseline, candidate),
        visibility: CategoryComparison::default(),
        lost_updates: None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::stats::LatencySummary;

    fn stats_with_mean(count: usize, mean: Duration) -> AggregateStats {
        AggregateStats {
            count,
            success_count: count,
            latency: LatencySummary::from_durations(vec![mean; count]),
        }
    }

    #[test]
    fn slower_candidate() {
        let baseline = BTreeMap::from([(
            Operation::GetCart,
            stats_with_mean(4, Duration::from_millis(40)),
        )]);
        let candidate = BTreeMap::from([(
            Operation::GetCart,
            stats_with_mean(4, Duration::from_millis(50)),
        )]);

        let comparison = compare("mysql", &baseline, "dynamodb", &candidate);
        let delta = &comparison.operations.matched[&Operation::GetCart];

        assert_eq!(delta.delta, Some(10.0));
        assert_eq!(delta.relative, Some(0.25));
        assert_eq!(delta.relative_percent(), Some(25.0));
        assert_eq!(delta.flag, None);
        assert!(comparison.operations.baseline_only.is_empty());
        assert!(comparison.operations.candidate_only.is_empty());
    }

    #[test]
    fn unmatched_categories_are_listed() {
        let baseline = BTreeMap::from([
            (Operation::CreateCart, stats_with_mean(2, Duration::from_millis(5))),
            (Operation::UpdateItem, stats_with_mean(2, Duration::from_millis(5))),
        ]);
        let candidate = BTreeMap::from([
            (Operation::CreateCart, stats_with_mean(2, Duration::from_millis(5))),
            (Operation::Checkout, stats_with_mean(2, Duration::from_millis(5))),
        ]);

        let comparison = compare("a", &baseline, "b", &candidate);

        assert_eq!(comparison.operations.matched.len(), 1);
        assert_eq!(comparison.operations.matched[&Operation::CreateCart].delta, Some(0.0));
        assert_eq!(comparison.operations.baseline_only, vec![Operation::UpdateItem]);
        assert_eq!(comparison.operations.candidate_only, vec![Operation::Checkout]);
    }

    #[test]
    fn undefined_relative_is_flagged() {
        let empty = AggregateStats {
            count: 0,
            success_count: 0,
            latency: None,
        };
        let zero = stats_with_mean(3, Duration::ZERO);
        let some = stats_with_mean(3, Duration::from_millis(8));

        let delta = CategoryDelta::new(&empty, &some);
        assert_eq!(delta.flag, Some(DeltaFlag::EmptyBaseline));
        assert_eq!(delta.delta, None);
        assert_eq!(delta.relative, None);

        let delta = CategoryDelta::new(&some, &empty);
        assert_eq!(delta.flag, Some(DeltaFlag::EmptyCandidate));
        assert_eq!(delta.relative, None);

        let delta = CategoryDelta::new(&zero, &some);
        assert_eq!(delta.flag, Some(DeltaFlag::ZeroBaseline));
        assert_eq!(delta.delta, Some(8.0));
        assert_eq!(delta.relative, None);
    }

    #[test]
    fn serializes_operation_keys_by_name() {
        let baseline = BTreeMap::from([(
            Operation::AddItem,
            stats_with_mean(1, Duration::from_millis(2)),
        )]);
        let comparison = compare("a", &baseline, "b", &baseline);
        let json = serde_json::to_value(&comparison).unwrap();

        assert_eq!(json["matched"]["add_items"]["delta"], 0.0);
        assert!(json["matched"]["add_items"].get("flag").is_none());
    }

    #[test]
    fn compares_visibility_windows_and_lost_updates() {
        let visible = |count, success_count, delay| AggregateStats {
            count,
            success_count,
            latency: LatencySummary::from_durations(vec![delay; success_count]),
        };
        let baseline = BTreeMap::from([(
            "read_after_create".to_owned(),
            visible(10, 10, Duration::from_millis(4)),
        )]);
        let candidate = BTreeMap::from([
            (
                "read_after_create".to_owned(),
                visible(10, 8, Duration::from_millis(6)),
            ),
            (
                "add_item_visibility".to_owned(),
                visible(5, 5, Duration::from_millis(1)),
            ),
        ]);
        let lost = |delta| LostUpdateCount {
            expected: 25,
            delta,
        };

        let comparison = compare("mysql", &BTreeMap::new(), "dynamodb", &BTreeMap::new())
            .with_visibility(&baseline, &candidate)
            .with_lost_updates(Some(lost(Some(0))), Some(lost(Some(3))));

        let window = &comparison.visibility.matched["read_after_create"];
        assert_eq!(window.delta, Some(2.0));
        assert_eq!(window.relative, Some(0.5));
        assert_eq!(window.baseline_success_rate, Some(1.0));
        assert_eq!(window.candidate_success_rate, Some(0.8));
        assert_eq!(comparison.visibility.candidate_only, vec!["add_item_visibility"]);
        assert_eq!(comparison.lost_updates.unwrap().candidate.delta, Some(3));

        let json = serde_json::to_value(&comparison).unwrap();
        assert_eq!(json["visibility"]["matched"]["read_after_create"]["delta"], 2.0);
        assert_eq!(json["lost_updates"]["baseline"]["delta"], 0);
        assert!(json["matched"].as_object().unwrap().is_empty());
    }

    #[test]
    fn lost_updates_need_both_runs() {
        let lost = LostUpdateCount {
            expected: 25,
            delta: Some(1),
        };
        let comparison = compare("a", &BTreeMap::new(), "b", &BTreeMap::new())
            .with_lost_updates(Some(lost), None);
        assert_eq!(comparison.lost_updates, None);

        let json = serde_json::to_value(&comparison).unwrap();
        assert!(json.get("visibility").is_none());
        assert!(json.get("lost_updates").is_none());
    }
}

//! Detection of the delay between a write being acknowledged and becoming visible to reads.
//!
//! A probe issues one write and then polls with reads on a fixed interval, up to a bounded number
//! of attempts, until a read shows evidence of the write. Retrying here is the measurement itself:
//! the executor never retries on its own.

use std::future::Future;
use std::time::{Duration, SystemTime};

use crate::config::ProbePolicy;
use crate::error::{Error, Result};
use crate::http::{HttpRemote, NewCart, NewItem};
use crate::outcome::OutcomeRecord;
use crate::stats::LatencySummary;
use crate::timer::{Mark, as_millis_f64};

/// What a single probe observed about the visibility of its write.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsistencyObservation {
    /// Wall-clock time at which the write was acknowledged.
    pub write_time: SystemTime,
    /// Whether a read showed the write within the attempt budget.
    pub visible: bool,
    /// Time from the acknowledgement to the end of the first read showing the write.
    ///
    /// Only present if `visible` is `true`.
    pub visibility_delay: Option<Duration>,
    /// Number of reads issued.
    pub attempts: u32,
}

/// The result of one probe iteration.
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeOutcome {
    /// The write was acknowledged and its visibility was polled.
    Observed(ConsistencyObservation),
    /// The triggering write failed, so there was nothing to observe.
    WriteFailed,
}

/// Issues `write`, then polls `read` until it reports the write as visible.
///
/// `write` resolves to the executor's record and, if the write succeeded, a token identifying what
/// was written. `read` receives that token and resolves to the read's record and whether the
/// response contains evidence of the write. A failed read counts as "not yet visible".
///
/// Every record, of the write and of each read, is appended to `records`.
pub async fn poll_until_visible<T, W, R, RF>(
    policy: ProbePolicy,
    write: W,
    mut read: R,
    records: &mut Vec<OutcomeRecord>,
) -> ProbeOutcome
where
    T: Clone,
    W: Future<Output = (OutcomeRecord, Option<T>)>,
    R: FnMut(T) -> RF,
    RF: Future<Output = (OutcomeRecord, bool)>,
{
    let (write_record, token) = write.await;
    let acknowledged = Mark::now();

    let succeeded = write_record.succeeded();
    records.push(write_record);
    let Some(token) = token.filter(|_| succeeded) else {
        return ProbeOutcome::WriteFailed;
    };

    for attempt in 1..=policy.max_attempts {
        let (record, visible) = read(token.clone()).await;
        let seen = Mark::now();
        records.push(record);

        if visible {
            return ProbeOutcome::Observed(ConsistencyObservation {
                write_time: acknowledged.at(),
                visible: true,
                visibility_delay: Some(acknowledged.until(&seen)),
                attempts: attempt,
            });
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    ProbeOutcome::Observed(ConsistencyObservation {
        write_time: acknowledged.at(),
        visible: false,
        visibility_delay: None,
        attempts: policy.max_attempts,
    })
}

/// Summary of a series of probe iterations.
#[derive(Clone, Debug, Default)]
pub struct ProbeReport {
    /// Total number of iterations, including those whose write failed.
    pub iterations: usize,
    /// Iterations abandoned because the triggering write failed.
    pub write_failures: usize,
    /// One observation per iteration whose write succeeded.
    pub observations: Vec<ConsistencyObservation>,
    /// Every call issued by the probe, writes and reads alike.
    pub records: Vec<OutcomeRecord>,
}

impl ProbeReport {
    fn push(&mut self, outcome: ProbeOutcome) {
        self.iterations += 1;
        match outcome {
            ProbeOutcome::Observed(observation) => self.observations.push(observation),
            ProbeOutcome::WriteFailed => self.write_failures += 1,
        }
    }

    /// Number of iterations whose write never became visible.
    pub fn inconsistencies(&self) -> usize {
        self.observations.iter().filter(|o| !o.visible).count()
    }

    /// Share of all iterations that observed an inconsistency.
    pub fn inconsistency_rate(&self) -> Option<f64> {
        (self.iterations > 0).then(|| self.inconsistencies() as f64 / self.iterations as f64)
    }

    /// Visibility delays of all iterations where the write became visible.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.observations.iter().filter_map(|o| o.visibility_delay)
    }

    /// Distribution of visibility delays, absent if no write ever became visible.
    pub fn delay_summary(&self) -> Option<LatencySummary> {
        LatencySummary::from_durations(self.delays())
    }
}

/// Runs consistency probes against one service.
#[derive(Debug)]
pub struct Prober<'a> {
    remote: &'a HttpRemote,
    policy: ProbePolicy,
}

impl<'a> Prober<'a> {
    pub fn new(remote: &'a HttpRemote, policy: ProbePolicy) -> Self {
        Self { remote, policy }
    }

    /// Creates carts and measures how long it takes until each can be read back.
    ///
    /// A read shows the write as soon as the cart is found.
    pub async fn read_after_create(&self, iterations: usize) -> ProbeReport {
        let remote = self.remote;
        let mut report = ProbeReport::default();
        let mut records = Vec::new();

        for i in 0..iterations {
            let customer = NewCart::synthetic("consistency", i);
            let outcome = poll_until_visible(
                self.policy,
                remote.create_cart(&customer),
                move |cart_id: String| async move {
                    let (record, cart) = remote.get_cart(&cart_id).await;
                    (record, cart.is_some())
                },
                &mut records,
            )
            .await;

            log_iteration("read_after_create", i, &outcome);
            report.push(outcome);
        }

        report.records = records;
        report
    }

    /// Adds items to one cart and measures how long it takes until each shows up in the cart.
    ///
    /// Fails without observations if the cart cannot be created.
    pub async fn add_item_visibility(&self, iterations: usize) -> Result<ProbeReport> {
        let remote = self.remote;
        let (record, cart_id) = remote
            .create_cart(&NewCart::synthetic("add-item-consistency", 0))
            .await;
        let Some(cart_id) = cart_id.filter(|_| record.succeeded()) else {
            return Err(Error::Setup {
                phase: "add_item_visibility",
                record,
            });
        };
        tracing::info!(%cart_id, "created cart for add-item probe");

        let mut report = ProbeReport::default();
        let mut records = Vec::new();

        for i in 0..iterations {
            let item = NewItem {
                product_id: format!("consistency-prod-{i}"),
                product_name: format!("Consistency Product {i}"),
                quantity: 1,
                price_per_unit: 99.99,
            };

            let cart = cart_id.as_str();
            let write = async {
                let (record, _) = remote.add_item(cart, &item).await;
                (record, Some(()))
            };
            let product_id = item.product_id.as_str();
            let read = move |()| async move {
                let (record, cart) = remote.get_cart(cart).await;
                let visible = cart.is_some_and(|cart| cart.contains_product(product_id));
                (record, visible)
            };

            let outcome = poll_until_visible(self.policy, write, read, &mut records).await;

            log_iteration("add_item_visibility", i, &outcome);
            report.push(outcome);
        }

        report.records = records;
        Ok(report)
    }
}

fn log_iteration(probe: &str, iteration: usize, outcome: &ProbeOutcome) {
    match outcome {
        ProbeOutcome::Observed(ConsistencyObservation {
            visibility_delay: Some(delay),
            attempts,
            ..
        }) => {
            tracing::debug!(
                probe,
                iteration,
                attempts,
                delay_ms = as_millis_f64(*delay),
                "write visible"
            );
        }
        ProbeOutcome::Observed(ConsistencyObservation { attempts, .. }) => {
            tracing::warn!(probe, iteration, attempts, "write not visible");
        }
        ProbeOutcome::WriteFailed => {
            tracing::warn!(probe, iteration, "write failed, iteration abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use reqwest::StatusCode;

    use super::*;
    use crate::outcome::Operation;

    fn policy(max_attempts: u32) -> ProbePolicy {
        ProbePolicy {
            max_attempts,
            interval: Duration::from_millis(5),
        }
    }

    fn created() -> (OutcomeRecord, Option<&'static str>) {
        let record = OutcomeRecord::from_status(
            Operation::CreateCart,
            Duration::from_millis(1),
            StatusCode::CREATED,
        );
        (record, Some("abc123"))
    }

    fn read_result(status: StatusCode) -> OutcomeRecord {
        OutcomeRecord::from_status(Operation::GetCart, Duration::from_millis(1), status)
    }

    #[tokio::test]
    async fn visible_on_first_attempt() {
        let mut records = Vec::new();
        let outcome = poll_until_visible(
            policy(10),
            async { created() },
            |id| async move {
                assert_eq!(id, "abc123");
                (read_result(StatusCode::OK), true)
            },
            &mut records,
        )
        .await;

        let ProbeOutcome::Observed(observation) = outcome else {
            panic!("expected an observation");
        };
        assert!(observation.visible);
        assert_eq!(observation.attempts, 1);
        assert!(observation.visibility_delay.unwrap() >= Duration::ZERO);
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn becomes_visible_after_retries() {
        let reads = &AtomicU32::new(0);
        let mut records = Vec::new();
        let outcome = poll_until_visible(
            policy(10),
            async { created() },
            move |_| async move {
                // Not found twice, then a transient server error, then found.
                match reads.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => (read_result(StatusCode::NOT_FOUND), false),
                    2 => (read_result(StatusCode::INTERNAL_SERVER_ERROR), false),
                    _ => (read_result(StatusCode::OK), true),
                }
            },
            &mut records,
        )
        .await;

        let ProbeOutcome::Observed(observation) = outcome else {
            panic!("expected an observation");
        };
        assert!(observation.visible);
        assert_eq!(observation.attempts, 4);
        assert!(observation.visibility_delay.unwrap() >= Duration::from_millis(15));
        assert_eq!(records.len(), 5);
        assert_eq!(records[3].status_code(), 500);
    }

    #[tokio::test]
    async fn never_visible_has_no_delay() {
        let reads = &AtomicU32::new(0);
        let mut records = Vec::new();
        let outcome = poll_until_visible(
            policy(4),
            async { created() },
            move |_| async move {
                reads.fetch_add(1, Ordering::SeqCst);
                (read_result(StatusCode::NOT_FOUND), false)
            },
            &mut records,
        )
        .await;

        let ProbeOutcome::Observed(observation) = outcome else {
            panic!("expected an observation");
        };
        assert!(!observation.visible);
        assert_eq!(observation.visibility_delay, None);
        assert_eq!(observation.attempts, 4);
        assert_eq!(reads.load(Ordering::SeqCst), 4);
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn failed_write_is_not_polled() {
        let reads = &AtomicU32::new(0);
        let mut records = Vec::new();
        let outcome = poll_until_visible(
            policy(10),
            async {
                let record = OutcomeRecord::transport_failure(
                    Operation::CreateCart,
                    Duration::from_millis(3),
                );
                (record, None::<String>)
            },
            move |_| async move {
                reads.fetch_add(1, Ordering::SeqCst);
                (read_result(StatusCode::OK), true)
            },
            &mut records,
        )
        .await;

        assert_eq!(outcome, ProbeOutcome::WriteFailed);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn report_counts_inconsistencies_over_all_iterations() {
        let mut report = ProbeReport::default();
        let visible = |ms| {
            ProbeOutcome::Observed(ConsistencyObservation {
                write_time: SystemTime::now(),
                visible: true,
                visibility_delay: Some(Duration::from_millis(ms)),
                attempts: 1,
            })
        };
        report.push(visible(4));
        report.push(visible(8));
        report.push(ProbeOutcome::WriteFailed);
        report.push(ProbeOutcome::Observed(ConsistencyObservation {
            write_time: SystemTime::now(),
            visible: false,
            visibility_delay: None,
            attempts: 10,
        }));

        assert_eq!(report.iterations, 4);
        assert_eq!(report.write_failures, 1);
        assert_eq!(report.inconsistencies(), 1);
        assert_eq!(report.inconsistency_rate(), Some(0.25));

        let summary = report.delay_summary().unwrap();
        assert_eq!(summary.min, Duration::from_millis(4));
        assert_eq!(summary.max, Duration::from_millis(8));
        assert_eq!(summary.mean, Duration::from_millis(6));
    }

    #[test]
    fn empty_report_has_no_rates() {
        let report = ProbeReport::default();
        assert_eq!(report.inconsistency_rate(), None);
        assert_eq!(report.delay_summary(), None);
    }
}

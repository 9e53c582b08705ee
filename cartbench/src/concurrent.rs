//! Concurrent mutations of a single shared cart, to observe lost updates.
//!
//! Several independent workers add items to the same cart at the same time. After all of them are
//! done and a settle delay has passed, one final read tells how many of the acknowledged additions
//! the service actually kept. Lost updates (or duplicated ones) are the observation, not an error.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ConcurrentPlan;
use crate::error::{Error, Result};
use crate::http::{HttpRemote, NewCart, NewItem};
use crate::outcome::OutcomeRecord;

/// Runs `plan.workers` concurrent workers, each issuing `plan.ops_per_worker` calls to `op`.
///
/// `op` receives the worker index and the sequence number of the call within that worker. Calls of
/// one worker are sequential with `plan.call_delay` between them; workers are not coordinated with
/// each other. Each worker collects its records in its own buffer. The buffers are merged after all
/// workers have finished.
pub async fn drive<F, Fut>(plan: &ConcurrentPlan, op: F) -> Vec<OutcomeRecord>
where
    F: Fn(usize, usize) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = OutcomeRecord> + Send + 'static,
{
    let ops_per_worker = plan.ops_per_worker;
    let call_delay = plan.call_delay;

    let tasks: Vec<_> = (0..plan.workers)
        .map(|worker| {
            let op = op.clone();
            tokio::spawn(async move {
                let mut records = Vec::with_capacity(ops_per_worker);
                for seq in 0..ops_per_worker {
                    if seq > 0 {
                        tokio::time::sleep(call_delay).await;
                    }
                    records.push(op(worker, seq).await);
                }
                records
            })
        })
        .collect();

    let finished = futures::future::join_all(tasks).await;

    let mut records = Vec::with_capacity(plan.workers * ops_per_worker);
    for (worker, result) in finished.into_iter().enumerate() {
        match result {
            Ok(worker_records) => records.extend(worker_records),
            Err(err) => tracing::error!(
                worker,
                error = &err as &dyn std::error::Error,
                "worker did not complete"
            ),
        }
    }
    records
}

/// Outcome of the concurrent-update test.
#[derive(Clone, Debug)]
pub struct ConcurrentReport {
    /// The shared cart all workers mutated.
    pub cart_id: String,
    /// Number of workers.
    pub workers: usize,
    /// Successful mutations if nothing is lost: workers times operations per worker.
    pub expected: u64,
    /// Mutations the service acknowledged as successful.
    pub acknowledged: u64,
    /// Item count reported by the final read, absent if that read failed.
    pub observed: Option<u64>,
    /// Time from starting the first worker until the last one finished.
    pub elapsed: Duration,
    /// Every mutation issued by the workers.
    pub records: Vec<OutcomeRecord>,
    /// The read of the shared cart after the settle delay.
    pub final_read: OutcomeRecord,
}

impl ConcurrentReport {
    /// `expected - observed`.
    ///
    /// Positive values are lost updates, negative values are over-counts. Absent if the final read
    /// failed.
    pub fn delta(&self) -> Option<i64> {
        self.observed
            .map(|observed| self.expected as i64 - observed as i64)
    }
}

/// Creates a shared cart and lets concurrent workers add items to it.
///
/// Fails without observations if the shared cart cannot be created.
pub async fn concurrent_updates(
    remote: Arc<HttpRemote>,
    plan: ConcurrentPlan,
) -> Result<ConcurrentReport> {
    let (record, cart_id) = remote
        .create_cart(&NewCart::synthetic("concurrent", 0))
        .await;
    let Some(cart_id) = cart_id.filter(|_| record.succeeded()) else {
        return Err(Error::Setup {
            phase: "concurrent_updates",
            record,
        });
    };
    tracing::info!(
        %cart_id,
        workers = plan.workers,
        ops_per_worker = plan.ops_per_worker,
        "created shared cart"
    );

    let shared: Arc<str> = cart_id.as_str().into();
    let op = {
        let remote = Arc::clone(&remote);
        move |worker: usize, seq: usize| {
            let remote = Arc::clone(&remote);
            let cart_id = Arc::clone(&shared);
            async move {
                let item = NewItem {
                    product_id: format!("client{worker}-item{seq}"),
                    product_name: format!("Client {worker} Item {seq}"),
                    quantity: 1,
                    price_per_unit: 10.0,
                };
                remote.add_item(&cart_id, &item).await.0
            }
        }
    };

    let start = Instant::now();
    let records = drive(&plan, op).await;
    let elapsed = start.elapsed();
    tracing::info!(?elapsed, "all workers completed");

    tokio::time::sleep(plan.settle_delay).await;

    let (final_read, cart) = remote.get_cart(&cart_id).await;
    let observed = cart.map(|cart| cart.observed_item_count());
    if observed.is_none() {
        tracing::warn!(
            %cart_id,
            status = final_read.status_code(),
            "final read of shared cart failed"
        );
    }

    let acknowledged = records.iter().filter(|r| r.succeeded()).count() as u64;

    Ok(ConcurrentReport {
        cart_id,
        workers: plan.workers,
        expected: plan.expected_mutations(),
        acknowledged,
        observed,
        elapsed,
        records,
        final_read,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;

    use super::*;
    use crate::outcome::Operation;

    fn plan(workers: usize, ops_per_worker: usize) -> ConcurrentPlan {
        ConcurrentPlan {
            workers,
            ops_per_worker,
            call_delay: Duration::from_millis(1),
            settle_delay: Duration::ZERO,
        }
    }

    fn report(observed: Option<u64>) -> ConcurrentReport {
        let final_read = OutcomeRecord::restore(
            Operation::GetCart,
            Duration::from_millis(1),
            observed.is_some(),
            200,
            SystemTime::now(),
        );
        ConcurrentReport {
            cart_id: "shared".into(),
            workers: 5,
            expected: 25,
            acknowledged: 25,
            observed,
            elapsed: Duration::from_millis(100),
            records: Vec::new(),
            final_read,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_worker_issues_all_calls() {
        let calls = Arc::new(Mutex::new(BTreeMap::<usize, Vec<usize>>::new()));

        let op = {
            let calls = Arc::clone(&calls);
            move |worker: usize, seq: usize| {
                calls.lock().unwrap().entry(worker).or_default().push(seq);
                async move {
                    OutcomeRecord::transport_failure(Operation::AddItem, Duration::from_millis(1))
                }
            }
        };

        let records = drive(&plan(5, 5), op).await;
        assert_eq!(records.len(), 25);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        for seqs in calls.values() {
            assert_eq!(seqs, &[0, 1, 2, 3, 4]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let op = {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            move |_worker: usize, _seq: usize| {
                let in_flight = Arc::clone(&in_flight);
                let max_in_flight = Arc::clone(&max_in_flight);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    OutcomeRecord::transport_failure(Operation::AddItem, Duration::from_millis(20))
                }
            }
        };

        let records = drive(&plan(5, 2), op).await;
        assert_eq!(records.len(), 10);
        assert!(max_in_flight.load(Ordering::SeqCst) > 1);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_workers_issue_nothing() {
        let records = drive(&plan(0, 5), |_, _| async {
            OutcomeRecord::transport_failure(Operation::AddItem, Duration::ZERO)
        })
        .await;
        assert!(records.is_empty());
    }

    #[test]
    fn delta_is_reported_in_both_directions() {
        assert_eq!(report(Some(25)).delta(), Some(0));
        assert_eq!(report(Some(20)).delta(), Some(5));
        assert_eq!(report(Some(27)).delta(), Some(-2));
        assert_eq!(report(None).delta(), None);
    }
}

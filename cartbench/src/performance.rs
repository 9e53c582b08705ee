//! Sequential performance run over randomly chosen carts.
//!
//! The run consists of phases: create carts, add items to random carts, optionally update and
//! remove random items, and finally read random carts. Every call is recorded, and calls are
//! separated by a configurable pause.

use std::time::{Duration, SystemTime};

use indicatif::ProgressBar;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use crate::config::Performance;
use crate::http::{HttpRemote, ItemId, NewCart, NewItem};
use crate::outcome::OutcomeRecord;
use crate::timer::Mark;

/// All records of a sequential run.
#[derive(Debug)]
pub struct PerformanceRun {
    /// Wall-clock start of the run.
    pub started_at: SystemTime,
    /// Time from the first to the last call, including pauses.
    pub duration: Duration,
    /// Number of carts successfully created.
    pub carts: usize,
    /// Every call in issue order.
    pub records: Vec<OutcomeRecord>,
}

impl PerformanceRun {
    /// Whether the run finished within `limit`. A run taking exactly `limit` passes.
    pub fn within_time_limit(&self, limit: Duration) -> bool {
        self.duration <= limit
    }
}

/// Drives the phases of a sequential run.
#[derive(Debug)]
pub struct PerformanceRunner<'a> {
    remote: &'a HttpRemote,
    plan: &'a Performance,
    rng: SmallRng,
    bar: ProgressBar,
    records: Vec<OutcomeRecord>,
}

impl<'a> PerformanceRunner<'a> {
    /// Creates a runner. Progress is reported on `bar`, which may be hidden.
    pub fn new(remote: &'a HttpRemote, plan: &'a Performance, bar: ProgressBar) -> Self {
        let seed = plan.seed.unwrap_or_else(rand::random);
        tracing::debug!(seed, "seeding payload generator");

        bar.set_length(plan.total_calls() as u64);
        Self {
            remote,
            plan,
            rng: SmallRng::seed_from_u64(seed),
            bar,
            records: Vec::with_capacity(plan.total_calls()),
        }
    }

    /// Runs all phases and returns the collected records.
    pub async fn run(mut self) -> PerformanceRun {
        let start = Mark::now();

        let carts = self.create_carts().await;
        if carts.is_empty() {
            tracing::warn!("no cart was created, skipping remaining phases");
        } else {
            let mut items = self.add_items(&carts).await;
            self.update_items(&items).await;
            self.remove_items(&mut items).await;
            self.get_carts(&carts).await;
        }

        self.bar.finish_and_clear();
        PerformanceRun {
            started_at: start.at(),
            duration: start.elapsed(),
            carts: carts.len(),
            records: self.records,
        }
    }

    async fn record(&mut self, record: OutcomeRecord) {
        self.records.push(record);
        self.bar.inc(1);
        if !self.plan.pause.is_zero() {
            tokio::time::sleep(self.plan.pause).await;
        }
    }

    async fn create_carts(&mut self) -> Vec<String> {
        self.bar.set_message("creating carts");
        let mut carts = Vec::with_capacity(self.plan.creates);

        for seq in 0..self.plan.creates {
            let (record, cart_id) = self.remote.create_cart(&NewCart::synthetic("perf", seq)).await;
            if let Some(cart_id) = cart_id.filter(|_| record.succeeded()) {
                carts.push(cart_id);
            }
            self.record(record).await;
        }

        tracing::info!(created = carts.len(), requested = self.plan.creates, "carts created");
        carts
    }

    fn random_item(&mut self) -> NewItem {
        let product = self.rng.random_range(1..=1000);
        let cents = (self.rng.random_range(10.0..200.0_f64) * 100.0).round();
        NewItem {
            product_id: format!("prod-{product}"),
            product_name: format!("Product {product}"),
            quantity: self.rng.random_range(1..=5),
            price_per_unit: cents / 100.0,
        }
    }

    async fn add_items(&mut self, carts: &[String]) -> Vec<(String, ItemId)> {
        self.bar.set_message("adding items");
        let mut items = Vec::new();

        for _ in 0..self.plan.adds {
            let Some(cart_id) = carts.choose(&mut self.rng) else {
                break;
            };
            let item = self.random_item();
            let (record, item_id) = self.remote.add_item(cart_id, &item).await;
            if let Some(item_id) = item_id.filter(|_| record.succeeded()) {
                items.push((cart_id.clone(), item_id));
            }
            self.record(record).await;
        }

        items
    }

    async fn update_items(&mut self, items: &[(String, ItemId)]) {
        if self.plan.updates == 0 {
            return;
        }
        if items.is_empty() {
            tracing::warn!("no item ids known, skipping updates");
            return;
        }

        self.bar.set_message("updating items");
        for _ in 0..self.plan.updates {
            let Some((cart_id, item_id)) = items.choose(&mut self.rng) else {
                break;
            };
            let quantity = self.rng.random_range(1..=5);
            let record = self.remote.update_item(cart_id, item_id, quantity).await;
            self.record(record).await;
        }
    }

    async fn remove_items(&mut self, items: &mut Vec<(String, ItemId)>) {
        if self.plan.removes == 0 {
            return;
        }
        if items.is_empty() {
            tracing::warn!("no item ids known, skipping removals");
            return;
        }

        self.bar.set_message("removing items");
        for _ in 0..self.plan.removes {
            if items.is_empty() {
                tracing::warn!("every known item was removed, stopping removals");
                break;
            }
            let index = self.rng.random_range(0..items.len());
            let (cart_id, item_id) = items.swap_remove(index);
            let record = self.remote.remove_item(&cart_id, &item_id).await;
            self.record(record).await;
        }
    }

    async fn get_carts(&mut self, carts: &[String]) {
        self.bar.set_message("reading carts");
        for _ in 0..self.plan.gets {
            let Some(cart_id) = carts.choose(&mut self.rng) else {
                break;
            };
            let (record, _) = self.remote.get_cart(cart_id).await;
            self.record(record).await;
        }
    }
}

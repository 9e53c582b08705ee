//! Benchmarks and consistency probes for a remote shopping-cart service.
//!
//! The crate drives a shopping-cart HTTP API through its cart operations and records every call as
//! an [`OutcomeRecord`](outcome::OutcomeRecord): which operation ran, how long it took, whether it
//! succeeded and when it was observed. On top of those records it provides:
//!
//!  - a sequential [performance run](performance) over randomly chosen carts,
//!  - [consistency probes](probe) that measure how long writes take to become visible to reads,
//!  - a [concurrent-update test](concurrent) that counts lost updates on a shared cart,
//!  - exact per-operation [latency statistics](stats) and a [comparison](compare) of two runs.
//!
//! Failures of individual calls are data, not errors. Only failures that make a whole run
//! meaningless, such as an unhealthy service, are reported through [`Error`](error::Error).
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod compare;
pub mod concurrent;
pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod outcome;
pub mod performance;
pub mod probe;
pub mod report;
pub mod stats;
pub mod timer;

pub use crate::error::{Error, Result};

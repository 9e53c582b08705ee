//! Test utilities for cartbench.
//!
//! This crate provides an in-process fake of the shopping-cart service that can be told to
//! misbehave, and a logger for tests. See the modules for all available utilities.

pub mod server;
pub mod service;
pub mod tracing;

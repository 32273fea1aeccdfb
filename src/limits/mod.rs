//! # Call-Admission and Budget Module
//!
//! This module decides whether a call to an external resource may proceed
//! right now, and keeps the rolling usage statistics that decision (and the
//! orchestrator's quota forecasting) feeds on.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`config::LimitConfig`] | Per-resource budget: rate, burst, strategy, backoff shape |
//! | [`config::LimitRegistry`] | Live budget view with a `default` entry and runtime updates |
//! | [`admission::AdmissionController`] | Strategy-dispatched admission decisions |
//! | [`usage::UsageTracker`] | Per-resource counters, latency averages, quota projection |
//!
//! ## Strategies
//!
//! Four admission strategies are supported, selected per resource:
//!
//! - **Fixed window**: counts calls in the current wall-clock minute.
//! - **Sliding window**: counts calls in the trailing 60 seconds.
//! - **Token bucket**: permission accrues continuously up to a burst cap.
//! - **Exponential backoff**: a failure-driven delay gates the next call.
//!
//! ```rust,no_run
//! use promptgate::limits::admission::AdmissionController;
//! use promptgate::limits::config::{LimitConfig, LimitRegistry, LimitStrategy, MemoryConfigRepository};
//! use promptgate::limits::usage::UsageTracker;
//! use std::sync::Arc;
//!
//! # async fn demo() -> promptgate::Result<()> {
//! let repo = Arc::new(MemoryConfigRepository::new());
//! let registry = Arc::new(LimitRegistry::load(repo).await?);
//! registry
//!     .update("openai", LimitConfig::new(60, 10, LimitStrategy::TokenBucket))
//!     .await?;
//!
//! let usage = Arc::new(UsageTracker::new(registry.clone()));
//! let admission = AdmissionController::new(registry, usage);
//! if admission.can_proceed("openai").await {
//!     // Make the call...
//! }
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod config;
pub mod usage;

//! # promptgate
//!
//! Budget-aware dispatch of text-generation requests across interchangeable
//! provider backends.
//!
//! ## Overview
//!
//! This library sits between application code and a pool of external
//! text-generation providers. Every call is gated by a per-resource budget,
//! routed to the backend with the best rolling performance, retried with
//! exponential backoff on failure, and gracefully degraded to a cached
//! last-known-good response when the budget is exhausted.
//!
//! ## Key Features
//!
//! - **Admission control**: four rate-limiting strategies per resource via
//!   [`limits::admission::AdmissionController`]
//! - **Priority queueing**: strict-priority FIFO lanes drained by a
//!   background dispatcher ([`queue`] module)
//! - **Backend selection**: composite performance scoring over rolling
//!   success rates and latencies ([`orchestrator`] module)
//! - **Graceful degradation**: durable last-known-good cache via
//!   [`fallback::FallbackStore`]
//! - **Output quality**: heuristic ranking and security filtering via
//!   [`ranking::OutputRanker`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use promptgate::backend::{HttpBackend, HttpBackendConfig};
//! use promptgate::orchestrator::Orchestrator;
//! use promptgate::types::ContextMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> promptgate::Result<()> {
//!     let backend = HttpBackend::new(HttpBackendConfig::new(
//!         "openai",
//!         "https://api.openai.com",
//!     ))?;
//!
//!     let orchestrator = Arc::new(
//!         Orchestrator::builder()
//!             .with_backend(Arc::new(backend))
//!             .build()
//!             .await?,
//!     );
//!
//!     let response = orchestrator
//!         .generate("Summarize the quarterly report.", &ContextMap::new())
//!         .await?;
//!     println!("{}", response.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`limits`] | Budgets, admission strategies, usage accounting |
//! | [`queue`] | Priority lanes and the background dispatcher |
//! | [`fallback`] | Last-known-good payload persistence |
//! | [`backend`] | Provider abstraction and the HTTP adapter |
//! | [`prompt`] | Prompt normalization and strategy framing |
//! | [`context`] | Context token budgeting |
//! | [`ranking`] | Response quality scoring and security filtering |
//! | [`orchestrator`] | The composed `generate` façade |

pub mod backend;
pub mod context;
pub mod fallback;
pub mod limits;
pub mod orchestrator;
pub mod prompt;
pub mod queue;
pub mod ranking;
pub mod types;

mod error;

pub use error::{Error, ErrorKind};

// Re-export main types for convenience
pub use backend::Backend;
pub use limits::config::{LimitConfig, LimitStrategy};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunOptions};
pub use prompt::PromptStrategy;
pub use types::{ContextMap, GenerationRequest, GenerationResponse, Priority, ResponseSource};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

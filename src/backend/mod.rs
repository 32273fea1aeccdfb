//! Backend abstraction over external text-generation providers.
//!
//! A backend is a thin transport adapter. Admission gating, retries, and
//! statistics all live above it in the orchestrator; implementations only
//! turn a [`GenerationRequest`] into a [`GenerationResponse`] or an error.

pub mod http;

pub use http::{HttpBackend, HttpBackendConfig};

use crate::types::{GenerationRequest, GenerationResponse};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable id for this backend, used as its admission-control resource
    /// and usage-accounting key.
    fn id(&self) -> &str;

    /// Execute one generation call. A single attempt: no retries here.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

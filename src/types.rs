//! Core request/response types shared across the dispatch engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Context supplied alongside a prompt. Insertion order is irrelevant;
/// the budgeter imposes its own ordering before the map reaches a backend.
pub type ContextMap = BTreeMap<String, Value>;

/// Priority of a queued call. Lanes drain strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub(crate) fn lane(&self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// A single generation call as seen by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Correlation id threaded through logs and backend calls.
    pub id: Uuid,
    pub prompt: String,
    #[serde(default)]
    pub context: ContextMap,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Attempts already made for this request. Mutated across retries.
    #[serde(default)]
    pub retry_count: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            context: ContextMap::new(),
            max_tokens: 1024,
            temperature: 0.7,
            retry_count: 0,
        }
    }

    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Where a response came from: a live backend call, or the fallback cache
/// when admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Live,
    FallbackCache,
}

/// The outcome of a generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    /// Id of the backend that produced the content. For fallback serves,
    /// the backend that produced the cached payload.
    pub backend: String,
    /// Seconds since the Unix epoch at completion time.
    pub timestamp: u64,
    pub tokens_used: Option<u32>,
    /// Composite quality score in [0, 1], set by the output ranker.
    pub confidence: Option<f64>,
    pub latency: Duration,
    pub source: ResponseSource,
}

impl GenerationResponse {
    pub fn is_fallback(&self) -> bool {
        self.source == ResponseSource::FallbackCache
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_lanes_are_distinct_and_ordered() {
        let lanes: Vec<usize> = Priority::ALL.iter().map(|p| p.lane()).collect();
        assert_eq!(lanes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn request_defaults() {
        let req = GenerationRequest::new("hello");
        assert_eq!(req.max_tokens, 1024);
        assert_eq!(req.retry_count, 0);
        assert!(req.context.is_empty());
    }

    #[test]
    fn request_roundtrips_through_json() {
        let mut ctx = ContextMap::new();
        ctx.insert("current_task".into(), Value::String("summarize".into()));
        let req = GenerationRequest::new("summarize this")
            .with_context(ctx)
            .with_max_tokens(256)
            .with_temperature(0.2);
        let json = serde_json::to_string(&req).unwrap();
        let back: GenerationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.prompt, "summarize this");
        assert_eq!(back.max_tokens, 256);
        assert_eq!(back.context.len(), 1);
    }
}

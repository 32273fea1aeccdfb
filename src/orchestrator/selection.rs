//! Backend performance bookkeeping and score-based selection.
//!
//! This is the "which backend performs best" statistic domain, owned by the
//! orchestrator and distinct from the per-resource usage stats that drive
//! admission control.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Latency floor so near-zero averages don't blow up the score.
const LATENCY_FLOOR_SECS: f64 = 0.001;
/// Neutral latency assumed for backends with no completed successes yet.
const NEUTRAL_LATENCY_SECS: f64 = 1.0;

/// Rolling quality record for one backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendPerformance {
    pub success_count: u64,
    pub failure_count: u64,
    /// Rolling average latency over successes, in seconds.
    pub avg_latency_secs: f64,
}

impl BackendPerformance {
    /// Fraction of finished calls that succeeded. Optimistic for unseen
    /// backends so new entries still attract traffic.
    pub fn success_rate(&self) -> f64 {
        let finished = self.success_count + self.failure_count;
        if finished == 0 {
            return 1.0;
        }
        self.success_count as f64 / finished as f64
    }

    /// Selection score: `0.7 × success_rate + 0.3 × (1 / avg_latency)`.
    pub fn score(&self) -> f64 {
        let latency = if self.success_count == 0 {
            NEUTRAL_LATENCY_SECS
        } else {
            self.avg_latency_secs.max(LATENCY_FLOOR_SECS)
        };
        0.7 * self.success_rate() + 0.3 * (1.0 / latency)
    }
}

/// Shared scoreboard across all orchestrator calls. Entries are created
/// lazily and live for the process lifetime.
#[derive(Default)]
pub(crate) struct Scoreboard {
    inner: Mutex<HashMap<String, BackendPerformance>>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, backend: &str, latency: Duration) {
        let mut inner = self.inner.lock().await;
        let perf = inner.entry(backend.to_string()).or_default();
        perf.success_count += 1;
        let n = perf.success_count as f64;
        perf.avg_latency_secs =
            (perf.avg_latency_secs * (n - 1.0) + latency.as_secs_f64()) / n;
    }

    pub async fn record_failure(&self, backend: &str) {
        let mut inner = self.inner.lock().await;
        inner.entry(backend.to_string()).or_default().failure_count += 1;
    }

    /// Highest-scoring candidate; earlier candidates win ties.
    pub async fn select(&self, candidates: &[&str]) -> Option<String> {
        let inner = self.inner.lock().await;
        let mut best: Option<(&str, f64)> = None;
        for id in candidates {
            let score = inner.get(*id).cloned().unwrap_or_default().score();
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((id, score)),
            }
        }
        best.map(|(id, _)| id.to_string())
    }

    pub async fn snapshot(&self) -> HashMap<String, BackendPerformance> {
        self.inner.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_follows_the_selection_formula() {
        let a = BackendPerformance {
            success_count: 10,
            failure_count: 0,
            avg_latency_secs: 1.0,
        };
        assert!((a.score() - 1.0).abs() < 1e-9);

        let b = BackendPerformance {
            success_count: 5,
            failure_count: 5,
            avg_latency_secs: 0.1,
        };
        // 0.7 × 0.5 + 0.3 × 10 = 3.35
        assert!((b.score() - 3.35).abs() < 1e-9);
        assert!(b.score() > a.score());
    }

    #[test]
    fn unseen_backend_gets_a_neutral_score() {
        let fresh = BackendPerformance::default();
        assert!((fresh.score() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn select_prefers_the_strictly_greater_score() {
        let board = Scoreboard::new();
        // a: perfect record at 1s; b: half failures but very fast.
        for _ in 0..4 {
            board.record_success("a", Duration::from_secs(1)).await;
        }
        board.record_success("b", Duration::from_millis(100)).await;
        board.record_failure("b").await;

        // b: 0.7 × 0.5 + 0.3 / 0.1 = 3.35 > a: 1.0
        assert_eq!(board.select(&["a", "b"]).await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn failures_lower_the_score() {
        let board = Scoreboard::new();
        board.record_success("a", Duration::from_secs(1)).await;
        for _ in 0..9 {
            board.record_failure("a").await;
        }
        board.record_success("b", Duration::from_secs(1)).await;

        assert_eq!(board.select(&["a", "b"]).await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn select_on_empty_candidates_is_none() {
        let board = Scoreboard::new();
        assert_eq!(board.select(&[]).await, None);
    }
}

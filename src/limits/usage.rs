//! Rolling per-resource usage accounting.
//!
//! This is the "may I call this resource" statistic domain. Backend quality
//! scoring lives in the orchestrator and is tracked separately.

use super::config::LimitRegistry;
use crate::types::unix_timestamp;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Counters for one resource. Created lazily on first reference and never
/// reset for the life of the process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    /// Running average response time over successful calls, in seconds.
    pub avg_response_time: f64,
    /// Seconds since the Unix epoch of the most recent recorded call.
    pub last_request_at: Option<u64>,
}

impl UsageStats {
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_requests + self.failed_requests;
        if finished == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / finished as f64
    }
}

pub struct UsageTracker {
    registry: Arc<LimitRegistry>,
    stats: Mutex<HashMap<String, UsageStats>>,
}

impl UsageTracker {
    pub fn new(registry: Arc<LimitRegistry>) -> Self {
        Self {
            registry,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Record one finished call. The running average is updated incrementally
    /// over successes only.
    pub async fn record(&self, resource: &str, success: bool, latency: Duration) {
        let mut stats = self.stats.lock().await;
        let entry = stats.entry(resource.to_string()).or_default();
        entry.total_requests += 1;
        entry.last_request_at = Some(unix_timestamp());
        if success {
            entry.successful_requests += 1;
            let n = entry.successful_requests as f64;
            entry.avg_response_time =
                (entry.avg_response_time * (n - 1.0) + latency.as_secs_f64()) / n;
        } else {
            entry.failed_requests += 1;
        }
    }

    /// Record a call that was refused locally or rejected upstream with a
    /// rate-limit response.
    pub async fn record_rate_limited(&self, resource: &str) {
        let mut stats = self.stats.lock().await;
        let entry = stats.entry(resource.to_string()).or_default();
        entry.rate_limited_requests += 1;
        entry.last_request_at = Some(unix_timestamp());
    }

    pub async fn stats(&self, resource: &str) -> Option<UsageStats> {
        self.stats.lock().await.get(resource).cloned()
    }

    pub async fn all_stats(&self) -> HashMap<String, UsageStats> {
        self.stats.lock().await.clone()
    }

    /// Projected quota usage over `horizon_hours`, as a percentage in
    /// [0, 100] of the resource's daily budget (`rpm × 60 × 24`).
    ///
    /// The observed rate is a linear extrapolation of total recorded calls
    /// over the time elapsed since the last recorded call. Returns 0 when
    /// there is no data to extrapolate from.
    pub async fn predict_usage(&self, resource: &str, horizon_hours: f64) -> f64 {
        if horizon_hours <= 0.0 {
            return 0.0;
        }
        let (total, last) = {
            let stats = self.stats.lock().await;
            match stats.get(resource) {
                Some(s) if s.total_requests > 0 => (s.total_requests, s.last_request_at),
                _ => return 0.0,
            }
        };
        let Some(last) = last else { return 0.0 };
        let elapsed_hours = unix_timestamp().saturating_sub(last) as f64 / 3600.0;
        if elapsed_hours <= 0.0 {
            return 100.0;
        }
        let rate_per_hour = total as f64 / elapsed_hours;
        let config = self.registry.config_for(resource).await;
        let daily_quota = config.requests_per_minute as f64 * 60.0 * 24.0;
        ((rate_per_hour * horizon_hours) / daily_quota * 100.0).clamp(0.0, 100.0)
    }
}

//! Admission control: decides whether a call to a resource may proceed
//! right now under its configured budget.
//!
//! Strategy state lives behind a single async mutex so concurrent callers
//! and the dispatcher never lose updates to counters or token balances.
//! Time is measured with [`tokio::time::Instant`], so paused-clock tests
//! can drive window eviction and refill deterministically.

use super::config::{LimitConfig, LimitRegistry, LimitStrategy};
use super::usage::UsageTracker;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);
const INITIAL_BACKOFF_SECS: f64 = 1.0;

/// Point-in-time view of a resource's admission state.
#[derive(Debug, Clone)]
pub struct AdmissionSnapshot {
    pub strategy: LimitStrategy,
    /// Tokens (token bucket) or remaining slots (window strategies).
    pub available: Option<f64>,
    /// Current exponential-backoff delay, if the strategy uses one and a
    /// failure has initialized it.
    pub current_backoff_secs: Option<f64>,
    /// Estimated wait until the next call would be admitted, if currently
    /// refused.
    pub estimated_wait: Option<Duration>,
}

#[derive(Debug)]
enum ResourceState {
    FixedWindow {
        minute: u64,
        count: u32,
    },
    SlidingWindow {
        log: VecDeque<Instant>,
    },
    TokenBucket {
        tokens: f64,
        last_refill: Instant,
    },
    ExponentialBackoff {
        current_delay_secs: Option<f64>,
        last_call: Option<Instant>,
    },
}

impl ResourceState {
    fn fresh(config: &LimitConfig) -> Self {
        match config.strategy {
            LimitStrategy::FixedWindow => ResourceState::FixedWindow {
                minute: current_minute(),
                count: 0,
            },
            LimitStrategy::SlidingWindow => ResourceState::SlidingWindow {
                log: VecDeque::new(),
            },
            LimitStrategy::TokenBucket => ResourceState::TokenBucket {
                tokens: config.burst as f64,
                last_refill: Instant::now(),
            },
            LimitStrategy::ExponentialBackoff => ResourceState::ExponentialBackoff {
                current_delay_secs: None,
                last_call: None,
            },
        }
    }

    fn matches(&self, strategy: LimitStrategy) -> bool {
        matches!(
            (self, strategy),
            (ResourceState::FixedWindow { .. }, LimitStrategy::FixedWindow)
                | (ResourceState::SlidingWindow { .. }, LimitStrategy::SlidingWindow)
                | (ResourceState::TokenBucket { .. }, LimitStrategy::TokenBucket)
                | (
                    ResourceState::ExponentialBackoff { .. },
                    LimitStrategy::ExponentialBackoff
                )
        )
    }
}

fn current_minute() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / 60
}

/// Whether one more call fits in the given wall-clock minute, rolling the
/// window when the minute has changed.
fn fixed_window_allow(minute: &mut u64, count: &mut u32, now_minute: u64, rpm: u32) -> bool {
    if *minute != now_minute {
        *minute = now_minute;
        *count = 0;
    }
    if *count < rpm {
        *count += 1;
        true
    } else {
        false
    }
}

fn refill(tokens: &mut f64, last_refill: &mut Instant, config: &LimitConfig) {
    let now = Instant::now();
    let elapsed = now.duration_since(*last_refill).as_secs_f64();
    if elapsed > 0.0 {
        *tokens = (*tokens + elapsed * config.refill_rate()).min(config.burst as f64);
        *last_refill = now;
    }
}

pub struct AdmissionController {
    registry: Arc<LimitRegistry>,
    usage: Arc<UsageTracker>,
    states: Mutex<HashMap<String, ResourceState>>,
}

impl AdmissionController {
    pub fn new(registry: Arc<LimitRegistry>, usage: Arc<UsageTracker>) -> Self {
        Self {
            registry,
            usage,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Check whether a call may proceed, consuming one budget slot if so.
    pub async fn can_proceed(&self, resource: &str) -> bool {
        let config = self.registry.config_for(resource).await;
        let mut states = self.states.lock().await;
        let state = Self::state_for(&mut states, resource, &config);

        let allowed = match state {
            ResourceState::FixedWindow { minute, count } => {
                fixed_window_allow(minute, count, current_minute(), config.requests_per_minute)
            }
            ResourceState::SlidingWindow { log } => {
                let now = Instant::now();
                while let Some(front) = log.front() {
                    if now.duration_since(*front) >= WINDOW {
                        log.pop_front();
                    } else {
                        break;
                    }
                }
                if (log.len() as u32) < config.requests_per_minute {
                    log.push_back(now);
                    true
                } else {
                    false
                }
            }
            ResourceState::TokenBucket {
                tokens,
                last_refill,
            } => {
                refill(tokens, last_refill, &config);
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    true
                } else {
                    false
                }
            }
            ResourceState::ExponentialBackoff {
                current_delay_secs,
                last_call,
            } => {
                let allowed = match (*current_delay_secs, *last_call) {
                    (Some(delay), Some(last)) => {
                        last.elapsed() >= Duration::from_secs_f64(delay)
                    }
                    _ => true,
                };
                if allowed {
                    *last_call = Some(Instant::now());
                }
                allowed
            }
        };

        if !allowed {
            tracing::debug!(resource, strategy = ?config.strategy, "admission refused");
        }
        allowed
    }

    /// Record the outcome of a call that was admitted earlier. Feeds the
    /// usage counters and, for backoff-limited resources, the delay state.
    pub async fn record_outcome(&self, resource: &str, success: bool, latency: Duration) {
        self.usage.record(resource, success, latency).await;

        let config = self.registry.config_for(resource).await;
        if config.strategy != LimitStrategy::ExponentialBackoff {
            return;
        }
        let mut states = self.states.lock().await;
        if let ResourceState::ExponentialBackoff {
            current_delay_secs, ..
        } = Self::state_for(&mut states, resource, &config)
        {
            if success {
                if config.reset_backoff_on_success && current_delay_secs.is_some() {
                    tracing::debug!(resource, "backoff delay cleared after success");
                    *current_delay_secs = None;
                }
            } else {
                let escalated = escalate(*current_delay_secs, &config);
                tracing::debug!(resource, delay_secs = escalated, "backoff delay escalated");
                *current_delay_secs = Some(escalated);
            }
        }
    }

    /// Record a rate-limit response from the provider itself. The local
    /// budget is saturated so subsequent checks refuse until it recovers.
    pub async fn record_external_rate_limit(&self, resource: &str) {
        self.usage.record_rate_limited(resource).await;

        let config = self.registry.config_for(resource).await;
        let mut states = self.states.lock().await;
        match Self::state_for(&mut states, resource, &config) {
            ResourceState::FixedWindow { count, .. } => {
                *count = config.requests_per_minute;
            }
            ResourceState::SlidingWindow { log } => {
                let now = Instant::now();
                while (log.len() as u32) < config.requests_per_minute {
                    log.push_back(now);
                }
            }
            ResourceState::TokenBucket { tokens, .. } => {
                *tokens = 0.0;
            }
            ResourceState::ExponentialBackoff {
                current_delay_secs,
                last_call,
            } => {
                *current_delay_secs = Some(escalate(*current_delay_secs, &config));
                *last_call = Some(Instant::now());
            }
        }
        tracing::warn!(resource, "external rate limit recorded, local budget saturated");
    }

    /// Suggested wait before retrying a refused resource.
    pub async fn suggested_retry_after(&self, resource: &str) -> Duration {
        self.registry.config_for(resource).await.suggested_retry_after()
    }

    pub async fn snapshot(&self, resource: &str) -> AdmissionSnapshot {
        let config = self.registry.config_for(resource).await;
        let mut states = self.states.lock().await;
        let state = Self::state_for(&mut states, resource, &config);

        match state {
            ResourceState::FixedWindow { minute, count } => {
                let rolled = *minute != current_minute();
                let used = if rolled { 0 } else { *count };
                let remaining = config.requests_per_minute.saturating_sub(used);
                AdmissionSnapshot {
                    strategy: config.strategy,
                    available: Some(remaining as f64),
                    current_backoff_secs: None,
                    estimated_wait: (remaining == 0).then(|| {
                        let secs = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs();
                        Duration::from_secs(60 - secs % 60)
                    }),
                }
            }
            ResourceState::SlidingWindow { log } => {
                let now = Instant::now();
                while let Some(front) = log.front() {
                    if now.duration_since(*front) >= WINDOW {
                        log.pop_front();
                    } else {
                        break;
                    }
                }
                let remaining = config
                    .requests_per_minute
                    .saturating_sub(log.len() as u32);
                let wait = (remaining == 0)
                    .then(|| log.front().map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest))))
                    .flatten();
                AdmissionSnapshot {
                    strategy: config.strategy,
                    available: Some(remaining as f64),
                    current_backoff_secs: None,
                    estimated_wait: wait,
                }
            }
            ResourceState::TokenBucket {
                tokens,
                last_refill,
            } => {
                refill(tokens, last_refill, &config);
                let wait = (*tokens < 1.0)
                    .then(|| Duration::from_secs_f64((1.0 - *tokens) / config.refill_rate()));
                AdmissionSnapshot {
                    strategy: config.strategy,
                    available: Some(*tokens),
                    current_backoff_secs: None,
                    estimated_wait: wait,
                }
            }
            ResourceState::ExponentialBackoff {
                current_delay_secs,
                last_call,
            } => {
                let wait = match (*current_delay_secs, *last_call) {
                    (Some(delay), Some(last)) => {
                        Duration::from_secs_f64(delay).checked_sub(last.elapsed())
                    }
                    _ => None,
                };
                AdmissionSnapshot {
                    strategy: config.strategy,
                    available: None,
                    current_backoff_secs: *current_delay_secs,
                    estimated_wait: wait,
                }
            }
        }
    }

    /// Per-resource state, reinitialized when the configured strategy has
    /// changed since the state was created.
    fn state_for<'a>(
        states: &'a mut HashMap<String, ResourceState>,
        resource: &str,
        config: &LimitConfig,
    ) -> &'a mut ResourceState {
        let entry = states
            .entry(resource.to_string())
            .or_insert_with(|| ResourceState::fresh(config));
        if !entry.matches(config.strategy) {
            *entry = ResourceState::fresh(config);
        }
        entry
    }
}

fn escalate(current: Option<f64>, config: &LimitConfig) -> f64 {
    (current.unwrap_or(INITIAL_BACKOFF_SECS) * config.backoff_multiplier)
        .min(config.max_backoff_secs)
}

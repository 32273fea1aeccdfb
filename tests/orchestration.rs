//! End-to-end orchestration flows against scripted backends.

use async_trait::async_trait;
use promptgate::backend::Backend;
use promptgate::limits::config::MemoryConfigRepository;
use promptgate::orchestrator::{Orchestrator, RunOptions};
use promptgate::types::{
    ContextMap, GenerationRequest, GenerationResponse, Priority, ResponseSource,
};
use promptgate::{Error, ErrorKind, LimitConfig, LimitStrategy, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GOOD_ANSWER: &str = "Ownership in Rust moves values between bindings. \
    According to the borrow checker's rules, each value has exactly one owner \
    at a time, because aliasing and mutation must not coexist. In summary, \
    ownership is what makes Rust memory-safe without garbage collection.";

enum Script {
    Succeed(&'static str),
    Fail,
    RateLimited,
}

struct ScriptedBackend {
    id: String,
    script: Script,
    latency: Duration,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(id: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script,
            latency: Duration::from_millis(100),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn with_latency(id: &str, script: Script, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script,
            latency,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        tokio::time::sleep(self.latency).await;
        match &self.script {
            Script::Succeed(content) => Ok(GenerationResponse {
                content: content.to_string(),
                backend: self.id.clone(),
                timestamp: 0,
                tokens_used: Some(42),
                confidence: None,
                latency: self.latency,
                source: ResponseSource::Live,
            }),
            Script::Fail => Err(Error::Backend {
                backend: self.id.clone(),
                message: "HTTP 500".to_string(),
                status: Some(500),
            }),
            Script::RateLimited => Err(Error::Backend {
                backend: self.id.clone(),
                message: "HTTP 429".to_string(),
                status: Some(429),
            }),
        }
    }
}

fn limits(default: LimitConfig) -> Arc<MemoryConfigRepository> {
    let mut configs = HashMap::new();
    configs.insert("default".to_string(), default);
    Arc::new(MemoryConfigRepository::with_configs(configs))
}

async fn orchestrator_with(
    backends: Vec<Arc<ScriptedBackend>>,
    default: LimitConfig,
) -> Orchestrator {
    let mut builder = Orchestrator::builder().with_config_repository(limits(default));
    for backend in backends {
        builder = builder.with_backend(backend);
    }
    builder.build().await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn successful_generation_carries_confidence_and_stats() {
    let backend = ScriptedBackend::new("api", Script::Succeed(GOOD_ANSWER));
    let orchestrator = orchestrator_with(vec![backend.clone()], LimitConfig::default()).await;

    let response = orchestrator
        .generate("explain ownership in Rust", &ContextMap::new())
        .await
        .unwrap();

    assert_eq!(response.backend, "api");
    assert_eq!(response.source, ResponseSource::Live);
    assert!(response.confidence.unwrap() > 0.5);

    let stats = orchestrator.usage_stats("api").await.unwrap();
    assert_eq!(stats.successful_requests, 1);
    let perf = orchestrator.backend_performance().await;
    assert_eq!(perf.get("api").unwrap().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_makes_exactly_initial_plus_retries_attempts() {
    let a = ScriptedBackend::new("a", Script::Fail);
    let b = ScriptedBackend::new("b", Script::Fail);
    let config = LimitConfig::new(600, 20, LimitStrategy::TokenBucket).with_retry_attempts(2);
    let orchestrator = orchestrator_with(vec![a.clone(), b.clone()], config).await;

    let err = orchestrator
        .generate("explain ownership", &ContextMap::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AllBackendsExhausted);
    match err {
        Error::AllBackendsExhausted { attempts } => assert_eq!(attempts, 6),
        other => panic!("unexpected error: {other}"),
    }
    // Initial attempt plus two retries, per backend, never more.
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 3);

    // Both statistic domains saw every failure.
    let stats = orchestrator.usage_stats("a").await.unwrap();
    assert_eq!(stats.failed_requests, 3);
    let perf = orchestrator.backend_performance().await;
    assert_eq!(perf.get("b").unwrap().failure_count, 3);
}

#[tokio::test(start_paused = true)]
async fn failed_backend_is_excluded_and_the_other_answers() {
    let flaky = ScriptedBackend::new("flaky", Script::Fail);
    let steady = ScriptedBackend::with_latency(
        "steady",
        Script::Succeed(GOOD_ANSWER),
        Duration::from_millis(50),
    );
    // Both start with neutral scores, so the first-listed flaky backend
    // is tried first and excluded after its single permitted attempt.
    let config = LimitConfig::new(600, 20, LimitStrategy::TokenBucket).with_retry_attempts(0);
    let orchestrator = orchestrator_with(vec![flaky.clone(), steady.clone()], config).await;

    let response = orchestrator
        .generate("explain ownership in Rust", &ContextMap::new())
        .await
        .unwrap();

    assert_eq!(response.backend, "steady");
    assert_eq!(flaky.calls(), 1);
    assert_eq!(steady.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn selection_prefers_the_faster_backend_once_observed() {
    let slow = ScriptedBackend::with_latency(
        "slow",
        Script::Succeed(GOOD_ANSWER),
        Duration::from_secs(2),
    );
    let fast = ScriptedBackend::with_latency(
        "fast",
        Script::Succeed(GOOD_ANSWER),
        Duration::from_millis(100),
    );
    let config = LimitConfig::new(600, 20, LimitStrategy::TokenBucket);
    let orchestrator = orchestrator_with(vec![slow.clone(), fast.clone()], config).await;

    // First two calls observe each backend once: unseen backends score a
    // neutral 1.0, so "slow" (listed first) wins the opening tie, after
    // which its 2s average drags it below the untouched "fast".
    for _ in 0..4 {
        orchestrator
            .generate("explain ownership in Rust", &ContextMap::new())
            .await
            .unwrap();
    }

    // slow: 0.7 + 0.3/2 = 0.85; fast: 0.7 + 0.3/0.1 = 3.7.
    assert_eq!(slow.calls(), 1);
    assert_eq!(fast.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn refused_admission_serves_the_fallback_cache() {
    let backend = ScriptedBackend::new("api", Script::Succeed(GOOD_ANSWER));
    let config = LimitConfig::new(60, 1, LimitStrategy::TokenBucket);
    let orchestrator = orchestrator_with(vec![backend.clone()], config).await;

    let live = orchestrator
        .generate("explain ownership in Rust", &ContextMap::new())
        .await
        .unwrap();
    assert_eq!(live.source, ResponseSource::Live);

    // The single token is spent; the next call degrades to the cache.
    let cached = orchestrator
        .generate("explain ownership in Rust", &ContextMap::new())
        .await
        .unwrap();
    assert_eq!(cached.source, ResponseSource::FallbackCache);
    assert_eq!(cached.backend, "api");
    assert_eq!(cached.content, GOOD_ANSWER);
    assert_eq!(backend.calls(), 1);

    let stats = orchestrator.usage_stats("api").await.unwrap();
    assert_eq!(stats.rate_limited_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn refused_admission_without_fallback_reports_retry_after() {
    let backend = ScriptedBackend::new("api", Script::Succeed(GOOD_ANSWER));
    let config = LimitConfig::new(60, 1, LimitStrategy::TokenBucket);
    let orchestrator = orchestrator_with(vec![backend], config).await;

    let options = RunOptions {
        use_fallback: false,
        ..RunOptions::default()
    };
    orchestrator
        .generate_with("explain ownership", &ContextMap::new(), &options)
        .await
        .unwrap();

    let err = orchestrator
        .generate_with("explain ownership", &ContextMap::new(), &options)
        .await
        .unwrap_err();
    match err {
        Error::QuotaExceeded {
            resource,
            retry_after,
        } => {
            assert_eq!(resource, "api");
            assert_eq!(retry_after, Duration::from_secs(1));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn upstream_rate_limit_saturates_the_local_budget() {
    let backend = ScriptedBackend::new("api", Script::RateLimited);
    let config = LimitConfig::new(60, 5, LimitStrategy::TokenBucket).with_retry_attempts(0);
    let orchestrator = orchestrator_with(vec![backend.clone()], config).await;

    let err = orchestrator
        .generate("explain ownership", &ContextMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AllBackendsExhausted);
    assert_eq!(backend.calls(), 1);

    // The provider's 429 drained the local bucket, so the next call is
    // refused outright without reaching the backend.
    let err = orchestrator
        .generate("explain ownership", &ContextMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(backend.calls(), 1);

    let stats = orchestrator.usage_stats("api").await.unwrap();
    assert!(stats.rate_limited_requests >= 1);
    assert_eq!(stats.failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn leaky_response_is_rejected_not_returned() {
    let backend = ScriptedBackend::new(
        "leaky",
        Script::Succeed("The credentials are api_key=sk_live_2f8a9b3c1d in production."),
    );
    let orchestrator = orchestrator_with(vec![backend], LimitConfig::default()).await;

    let err = orchestrator
        .generate("explain the deployment", &ContextMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityFilterRejected);
}

#[tokio::test(start_paused = true)]
async fn fan_out_ranks_across_backends_and_filters() {
    let good = ScriptedBackend::new("good", Script::Succeed(GOOD_ANSWER));
    let weak = ScriptedBackend::new("weak", Script::Succeed("maybe"));
    let leaky = ScriptedBackend::new(
        "leaky",
        Script::Succeed("Use api_key=sk_live_2f8a9b3c1d for this."),
    );
    let down = ScriptedBackend::new("down", Script::Fail);
    let config = LimitConfig::new(600, 20, LimitStrategy::TokenBucket);
    let orchestrator = orchestrator_with(
        vec![good.clone(), weak.clone(), leaky.clone(), down.clone()],
        config,
    )
    .await;

    let ranked = orchestrator
        .generate_fan_out(
            "explain ownership in Rust",
            &ContextMap::new(),
            &RunOptions::default(),
        )
        .await
        .unwrap();

    // All four were queried concurrently; only the quality answer survives
    // ranking and filtering.
    assert_eq!(good.calls(), 1);
    assert_eq!(down.calls(), 1);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].backend, "good");
    assert!(ranked[0].confidence.unwrap() > 0.5);

    let perf = orchestrator.backend_performance().await;
    assert_eq!(perf.get("down").unwrap().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn fan_out_with_all_backends_failing_is_exhaustion() {
    let a = ScriptedBackend::new("a", Script::Fail);
    let b = ScriptedBackend::new("b", Script::Fail);
    let orchestrator = orchestrator_with(vec![a, b], LimitConfig::default()).await;

    let err = orchestrator
        .generate_fan_out(
            "explain ownership",
            &ContextMap::new(),
            &RunOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AllBackendsExhausted);
}

#[tokio::test(start_paused = true)]
async fn runtime_limit_update_takes_effect_and_persists() {
    let backend = ScriptedBackend::new("api", Script::Succeed(GOOD_ANSWER));
    let repo = limits(LimitConfig::default());
    let orchestrator = Orchestrator::builder()
        .with_backend(backend)
        .with_config_repository(repo.clone())
        .build()
        .await
        .unwrap();

    orchestrator
        .update_limit("api", LimitConfig::new(1, 1, LimitStrategy::SlidingWindow))
        .await
        .unwrap();

    let first = orchestrator
        .generate("explain ownership in Rust", &ContextMap::new())
        .await
        .unwrap();
    assert_eq!(first.source, ResponseSource::Live);

    let second = orchestrator
        .generate("explain ownership in Rust", &ContextMap::new())
        .await
        .unwrap();
    assert_eq!(second.source, ResponseSource::FallbackCache);

    // The update went through the repository, not just process memory.
    use promptgate::limits::config::ConfigRepository;
    let stored = repo.load().await.unwrap();
    assert_eq!(stored.get("api").unwrap().requests_per_minute, 1);
}

#[tokio::test(start_paused = true)]
async fn queued_calls_drain_in_priority_order() {
    let backend = ScriptedBackend::new("api", Script::Succeed(GOOD_ANSWER));
    let orchestrator = Arc::new(
        orchestrator_with(
            vec![backend.clone()],
            LimitConfig::new(600, 20, LimitStrategy::TokenBucket),
        )
        .await,
    );

    let low = orchestrator.enqueue(
        "describe the low-priority batch",
        ContextMap::new(),
        RunOptions::default(),
        Priority::Low,
    );
    let critical = orchestrator.enqueue(
        "describe the critical incident",
        ContextMap::new(),
        RunOptions::default(),
        Priority::Critical,
    );
    let medium = orchestrator.enqueue(
        "describe the medium cleanup",
        ContextMap::new(),
        RunOptions::default(),
        Priority::Medium,
    );
    assert_eq!(orchestrator.queue_status().total(), 3);

    let handle = orchestrator.start_dispatcher();
    let (critical, medium, low) = (
        critical.wait().await.unwrap(),
        medium.wait().await.unwrap(),
        low.wait().await.unwrap(),
    );
    assert_eq!(critical.source, ResponseSource::Live);
    assert_eq!(medium.source, ResponseSource::Live);
    assert_eq!(low.source, ResponseSource::Live);

    let prompts = backend.prompts.lock().unwrap().clone();
    let position = |needle: &str| {
        prompts
            .iter()
            .position(|p| p.contains(needle))
            .unwrap_or(usize::MAX)
    };
    assert!(position("critical incident") < position("medium cleanup"));
    assert!(position("medium cleanup") < position("low-priority batch"));

    handle.shutdown().await;
    assert_eq!(orchestrator.queue_status().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn dispatcher_requeues_refused_calls_until_budget_recovers() {
    let backend = ScriptedBackend::new("api", Script::Succeed(GOOD_ANSWER));
    let config = LimitConfig::new(60, 1, LimitStrategy::TokenBucket);
    let orchestrator = Arc::new(orchestrator_with(vec![backend.clone()], config).await);

    let options = RunOptions {
        use_fallback: false,
        ..RunOptions::default()
    };
    let first = orchestrator.enqueue(
        "explain ownership",
        ContextMap::new(),
        options.clone(),
        Priority::High,
    );
    let second = orchestrator.enqueue(
        "explain borrowing",
        ContextMap::new(),
        options,
        Priority::High,
    );

    let handle = orchestrator.start_dispatcher();
    assert_eq!(first.wait().await.unwrap().source, ResponseSource::Live);
    // The second call is refused once, re-queued, and succeeds after the
    // bucket refills a token.
    assert_eq!(second.wait().await.unwrap().source, ResponseSource::Live);
    assert_eq!(backend.calls(), 2);

    let stats = orchestrator.usage_stats("api").await.unwrap();
    assert!(stats.rate_limited_requests >= 1);

    handle.shutdown().await;
}

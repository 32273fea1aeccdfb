//! Top-level façade: prompt shaping, backend selection, admission gating,
//! retries, and ranking, composed into a single `generate` call.
//!
//! Per-call state machine:
//! `Selecting → Admitting → Executing → {Succeeded | Retrying → Selecting | Exhausted}`.
//! Admission refusal degrades to the fallback cache (or a `QuotaExceeded`
//! error) rather than failing over to another backend; execution failures
//! retry with reselection until every eligible backend has used up
//! `1 + retry_attempts` attempts.

pub mod selection;

pub use selection::BackendPerformance;

use crate::backend::Backend;
use crate::context::ContextBudgeter;
use crate::fallback::{FallbackEntry, FallbackRepository, FallbackStore, MemoryFallbackRepository};
use crate::limits::admission::AdmissionController;
use crate::limits::config::{ConfigRepository, LimitConfig, LimitRegistry, MemoryConfigRepository};
use crate::limits::usage::{UsageStats, UsageTracker};
use crate::prompt::{PromptEngineer, PromptStrategy};
use crate::queue::dispatcher::{self, DispatchJob, DispatcherConfig, DispatcherHandle};
use crate::queue::{QueueStatus, RequestQueue};
use crate::ranking::OutputRanker;
use crate::types::{
    ContextMap, GenerationRequest, GenerationResponse, Priority, ResponseSource,
};
use crate::{Error, Result};
use selection::Scoreboard;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Per-call knobs. The defaults serve a plain single-backend generation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub strategy: PromptStrategy,
    /// Fallback-cache data type; entries are keyed by `(backend, data_type)`.
    pub data_type: String,
    /// Serve the last-known-good cached payload when admission is refused.
    pub use_fallback: bool,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            strategy: PromptStrategy::default(),
            data_type: "generation".to_string(),
            use_fallback: true,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

/// Handle to a queued call; resolves when the dispatcher completes it.
pub struct PendingGeneration {
    receiver: oneshot::Receiver<Result<GenerationResponse>>,
}

impl PendingGeneration {
    pub async fn wait(self) -> Result<GenerationResponse> {
        self.receiver.await.unwrap_or(Err(Error::DispatcherStopped))
    }
}

pub struct OrchestratorBuilder {
    backends: Vec<Arc<dyn Backend>>,
    config_repository: Option<Arc<dyn ConfigRepository>>,
    fallback_repository: Option<Box<dyn FallbackRepository>>,
    max_context_tokens: u32,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            config_repository: None,
            fallback_repository: None,
            max_context_tokens: ContextBudgeter::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_config_repository(mut self, repository: Arc<dyn ConfigRepository>) -> Self {
        self.config_repository = Some(repository);
        self
    }

    pub fn with_fallback_repository(mut self, repository: Box<dyn FallbackRepository>) -> Self {
        self.fallback_repository = Some(repository);
        self
    }

    pub fn with_max_context_tokens(mut self, max_tokens: u32) -> Self {
        self.max_context_tokens = max_tokens;
        self
    }

    pub async fn build(self) -> Result<Orchestrator> {
        if self.backends.is_empty() {
            return Err(Error::Config("at least one backend is required".into()));
        }
        let config_repository = self
            .config_repository
            .unwrap_or_else(|| Arc::new(MemoryConfigRepository::new()));
        let registry = Arc::new(LimitRegistry::load(config_repository).await?);
        let usage = Arc::new(UsageTracker::new(registry.clone()));
        let admission = AdmissionController::new(registry.clone(), usage.clone());
        let fallback = FallbackStore::new(
            self.fallback_repository
                .unwrap_or_else(|| Box::new(MemoryFallbackRepository::new())),
        );

        Ok(Orchestrator {
            backends: self.backends,
            registry,
            usage,
            admission,
            fallback,
            engineer: PromptEngineer::new(),
            budgeter: ContextBudgeter::new(self.max_context_tokens),
            ranker: OutputRanker::new(),
            scoreboard: Scoreboard::new(),
            queue: Arc::new(RequestQueue::new()),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    backends: Vec<Arc<dyn Backend>>,
    registry: Arc<LimitRegistry>,
    usage: Arc<UsageTracker>,
    admission: AdmissionController,
    fallback: FallbackStore,
    engineer: PromptEngineer,
    budgeter: ContextBudgeter,
    ranker: OutputRanker,
    scoreboard: Scoreboard,
    queue: Arc<RequestQueue<DispatchJob>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Generate with default options.
    pub async fn generate(
        &self,
        prompt: &str,
        context: &ContextMap,
    ) -> Result<GenerationResponse> {
        self.generate_with(prompt, context, &RunOptions::default())
            .await
    }

    /// Generate against the best-scoring admissible backend, retrying with
    /// reselection until a backend succeeds or every one is exhausted.
    pub async fn generate_with(
        &self,
        prompt: &str,
        context: &ContextMap,
        options: &RunOptions,
    ) -> Result<GenerationResponse> {
        let request = self.prepare(prompt, context, options);
        self.execute(prompt, request, options).await
    }

    /// Query every admissible backend concurrently and return the ranked,
    /// filtered list of successful responses.
    pub async fn generate_fan_out(
        &self,
        prompt: &str,
        context: &ContextMap,
        options: &RunOptions,
    ) -> Result<Vec<GenerationResponse>> {
        let request = self.prepare(prompt, context, options);

        let mut admissible = Vec::new();
        for backend in &self.backends {
            if self.admission.can_proceed(backend.id()).await {
                admissible.push(backend.clone());
            } else {
                self.usage.record_rate_limited(backend.id()).await;
            }
        }

        if admissible.is_empty() {
            if options.use_fallback {
                for backend in &self.backends {
                    if let Some(entry) =
                        self.fallback.load(backend.id(), &options.data_type).await?
                    {
                        tracing::info!(backend = backend.id(), "serving fallback in fan-out mode");
                        return Ok(vec![fallback_response(entry)]);
                    }
                }
            }
            let resource = self
                .backends
                .first()
                .map(|b| b.id().to_string())
                .unwrap_or_default();
            let retry_after = self.admission.suggested_retry_after(&resource).await;
            return Err(Error::QuotaExceeded {
                resource,
                retry_after,
            });
        }

        let calls = admissible.iter().map(|backend| {
            let request = request.clone();
            let backend = backend.clone();
            async move {
                let start = Instant::now();
                let outcome = backend.generate(&request).await;
                (backend.id().to_string(), start.elapsed(), outcome)
            }
        });
        let outcomes = futures::future::join_all(calls).await;

        let attempted = outcomes.len() as u32;
        let mut successes = Vec::new();
        for (id, latency, outcome) in outcomes {
            match outcome {
                Ok(response) => {
                    self.admission.record_outcome(&id, true, latency).await;
                    self.scoreboard.record_success(&id, latency).await;
                    self.save_snapshot(&id, options, &response).await;
                    successes.push(response);
                }
                Err(err) => {
                    self.admission.record_outcome(&id, false, latency).await;
                    if let Error::Backend {
                        status: Some(429), ..
                    } = &err
                    {
                        self.admission.record_external_rate_limit(&id).await;
                    }
                    self.scoreboard.record_failure(&id).await;
                    tracing::warn!(backend = %id, error = %err, "fan-out call failed");
                }
            }
        }

        if successes.is_empty() {
            return Err(Error::AllBackendsExhausted {
                attempts: attempted,
            });
        }
        Ok(self.ranker.rank(prompt, successes))
    }

    /// Defer a call to the background dispatcher. The returned handle
    /// resolves once the dispatcher has executed (or given up on) the call.
    pub fn enqueue(
        &self,
        prompt: impl Into<String>,
        context: ContextMap,
        options: RunOptions,
        priority: Priority,
    ) -> PendingGeneration {
        let (tx, rx) = oneshot::channel();
        self.queue.enqueue(
            DispatchJob {
                prompt: prompt.into(),
                context,
                options,
                reply: Some(tx),
            },
            priority,
        );
        PendingGeneration { receiver: rx }
    }

    /// Start the background dispatch loop with default settings.
    pub fn start_dispatcher(self: &Arc<Self>) -> DispatcherHandle {
        self.start_dispatcher_with(DispatcherConfig::default())
    }

    pub fn start_dispatcher_with(self: &Arc<Self>, config: DispatcherConfig) -> DispatcherHandle {
        dispatcher::spawn(self.clone(), config)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub async fn usage_stats(&self, resource: &str) -> Option<UsageStats> {
        self.usage.stats(resource).await
    }

    pub async fn all_usage_stats(&self) -> HashMap<String, UsageStats> {
        self.usage.all_stats().await
    }

    pub async fn predict_usage(&self, resource: &str, horizon_hours: f64) -> f64 {
        self.usage.predict_usage(resource, horizon_hours).await
    }

    pub async fn backend_performance(&self) -> HashMap<String, BackendPerformance> {
        self.scoreboard.snapshot().await
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Replace a resource's budget at runtime, persisting through the
    /// config repository.
    pub async fn update_limit(&self, resource: &str, config: LimitConfig) -> Result<()> {
        self.registry.update(resource, config).await
    }

    pub(crate) fn queue(&self) -> &RequestQueue<DispatchJob> {
        &self.queue
    }

    fn prepare(
        &self,
        prompt: &str,
        context: &ContextMap,
        options: &RunOptions,
    ) -> GenerationRequest {
        let budgeted = self.budgeter.optimize(context);
        let engineered = self
            .engineer
            .engineer(prompt, &budgeted.entries, options.strategy);
        GenerationRequest::new(engineered)
            .with_context(budgeted.entries.into_iter().collect())
            .with_max_tokens(options.max_tokens)
            .with_temperature(options.temperature)
    }

    async fn execute(
        &self,
        raw_prompt: &str,
        mut request: GenerationRequest,
        options: &RunOptions,
    ) -> Result<GenerationResponse> {
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut total_attempts = 0u32;

        loop {
            // Selecting: best-scoring backend that still has attempt budget.
            let mut eligible: Vec<&Arc<dyn Backend>> = Vec::new();
            for backend in &self.backends {
                let budget = 1 + self.registry.config_for(backend.id()).await.retry_attempts;
                if attempts.get(backend.id()).copied().unwrap_or(0) < budget {
                    eligible.push(backend);
                }
            }
            let Some(chosen_id) = self
                .scoreboard
                .select(&eligible.iter().map(|b| b.id()).collect::<Vec<_>>())
                .await
            else {
                tracing::error!(
                    request_id = %request.id,
                    attempts = total_attempts,
                    "all backends exhausted"
                );
                return Err(Error::AllBackendsExhausted {
                    attempts: total_attempts,
                });
            };
            let backend: Arc<dyn Backend> = match eligible.iter().find(|b| b.id() == chosen_id) {
                Some(backend) => (*backend).clone(),
                None => {
                    return Err(Error::AllBackendsExhausted {
                        attempts: total_attempts,
                    })
                }
            };
            let resource = backend.id().to_string();

            // Admitting: a refusal degrades, it does not fail over.
            if !self.admission.can_proceed(&resource).await {
                self.usage.record_rate_limited(&resource).await;
                if options.use_fallback {
                    if let Some(entry) = self.fallback.load(&resource, &options.data_type).await? {
                        tracing::info!(
                            backend = %resource,
                            saved_at = entry.saved_at,
                            "admission refused, serving fallback"
                        );
                        return Ok(fallback_response(entry));
                    }
                }
                let retry_after = self.admission.suggested_retry_after(&resource).await;
                return Err(Error::QuotaExceeded {
                    resource,
                    retry_after,
                });
            }

            // Executing.
            request.retry_count = attempts.get(&resource).copied().unwrap_or(0);
            let start = Instant::now();
            match backend.generate(&request).await {
                Ok(mut response) => {
                    let latency = start.elapsed();
                    self.admission.record_outcome(&resource, true, latency).await;
                    self.scoreboard.record_success(&resource, latency).await;
                    self.save_snapshot(&resource, options, &response).await;

                    if let Some(pattern) = self.ranker.rejects(&response.content) {
                        tracing::warn!(
                            backend = %resource,
                            pattern,
                            "response rejected by security filter"
                        );
                        return Err(Error::SecurityFilterRejected { backend: resource });
                    }
                    response.confidence =
                        Some(self.ranker.score(raw_prompt, &response.content).composite());
                    return Ok(response);
                }
                Err(err) => {
                    let latency = start.elapsed();
                    self.admission
                        .record_outcome(&resource, false, latency)
                        .await;
                    if let Error::Backend {
                        status: Some(429), ..
                    } = &err
                    {
                        self.admission.record_external_rate_limit(&resource).await;
                    }
                    self.scoreboard.record_failure(&resource).await;
                    let made = attempts.entry(resource.clone()).or_insert(0);
                    *made += 1;
                    total_attempts += 1;
                    tracing::warn!(
                        backend = %resource,
                        attempt = *made,
                        error = %err,
                        "backend call failed, retrying with reselection"
                    );

                    // Retrying: wait 2^attempt before reselecting, exponent
                    // capped at the resource's retry budget. Skip the wait
                    // when nothing is left to retry.
                    let retry_attempts =
                        self.registry.config_for(&resource).await.retry_attempts;
                    let exponent = (*made - 1).min(retry_attempts).min(16);
                    let mut any_left = false;
                    for backend in &self.backends {
                        let budget =
                            1 + self.registry.config_for(backend.id()).await.retry_attempts;
                        if attempts.get(backend.id()).copied().unwrap_or(0) < budget {
                            any_left = true;
                            break;
                        }
                    }
                    if any_left {
                        tokio::time::sleep(Duration::from_secs(1u64 << exponent)).await;
                    }
                }
            }
        }
    }

    async fn save_snapshot(
        &self,
        resource: &str,
        options: &RunOptions,
        response: &GenerationResponse,
    ) {
        if let Err(err) = self
            .fallback
            .save(resource, &options.data_type, &response.content, resource)
            .await
        {
            tracing::warn!(backend = %resource, error = %err, "fallback snapshot save failed");
        }
    }
}

fn fallback_response(entry: FallbackEntry) -> GenerationResponse {
    let content = entry
        .payload
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| entry.payload.to_string());
    GenerationResponse {
        content,
        backend: entry.source,
        // The cached payload's creation time, so staleness is visible.
        timestamp: entry.saved_at,
        tokens_used: None,
        confidence: None,
        latency: Duration::ZERO,
        source: ResponseSource::FallbackCache,
    }
}

//! Per-resource call budget configuration and its persistence.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Resource name used when no per-resource entry exists.
pub const DEFAULT_RESOURCE: &str = "default";

/// Admission strategy for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStrategy {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    ExponentialBackoff,
}

fn default_strategy() -> LimitStrategy {
    LimitStrategy::TokenBucket
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_secs() -> f64 {
    300.0
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_reset_backoff() -> bool {
    true
}

/// Call-volume budget for a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Calls allowed per minute. Must be at least 1.
    pub requests_per_minute: u32,
    /// Burst capacity (token-bucket cap). Must be at least 1.
    pub burst: u32,
    #[serde(default = "default_strategy")]
    pub strategy: LimitStrategy,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: f64,
    /// Retries the orchestrator grants beyond the initial attempt.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Whether a successful call clears the exponential-backoff delay.
    #[serde(default = "default_reset_backoff")]
    pub reset_backoff_on_success: bool,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst: 10,
            strategy: default_strategy(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_secs: default_max_backoff_secs(),
            retry_attempts: default_retry_attempts(),
            reset_backoff_on_success: default_reset_backoff(),
        }
    }
}

impl LimitConfig {
    pub fn new(requests_per_minute: u32, burst: u32, strategy: LimitStrategy) -> Self {
        Self {
            requests_per_minute,
            burst,
            strategy,
            ..Self::default()
        }
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_backoff_secs(mut self, secs: f64) -> Self {
        self.max_backoff_secs = secs;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_reset_backoff_on_success(mut self, reset: bool) -> Self {
        self.reset_backoff_on_success = reset;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute < 1 {
            return Err(Error::Config(
                "requests_per_minute must be at least 1".into(),
            ));
        }
        if self.burst < 1 {
            return Err(Error::Config("burst must be at least 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(Error::Config(
                "backoff_multiplier must be greater than 1.0".into(),
            ));
        }
        if !self.max_backoff_secs.is_finite() || self.max_backoff_secs <= 0.0 {
            return Err(Error::Config("max_backoff_secs must be positive".into()));
        }
        Ok(())
    }

    /// Token refill rate in tokens per second.
    pub(crate) fn refill_rate(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }

    /// Suggested wait before a refused caller tries again: one budget slot,
    /// floored at one second.
    pub fn suggested_retry_after(&self) -> Duration {
        Duration::from_secs_f64((60.0 / self.requests_per_minute as f64).max(1.0))
    }
}

/// Storage abstraction for the resource → [`LimitConfig`] document, so the
/// medium is swappable without touching admission logic.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, LimitConfig>>;
    async fn save(&self, configs: &HashMap<String, LimitConfig>) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// File-backed repository. The format follows the extension: `.yaml`/`.yml`
/// documents are parsed with serde_yaml, anything else as JSON.
pub struct FileConfigRepository {
    path: PathBuf,
}

impl FileConfigRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn is_yaml(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    }
}

#[async_trait]
impl ConfigRepository for FileConfigRepository {
    async fn load(&self) -> Result<HashMap<String, LimitConfig>> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "limit config file absent, starting empty");
            return Ok(HashMap::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let configs = if Self::is_yaml(&self.path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(configs)
    }

    async fn save(&self, configs: &HashMap<String, LimitConfig>) -> Result<()> {
        let content = if Self::is_yaml(&self.path) {
            serde_yaml::to_string(configs)?
        } else {
            serde_json::to_string_pretty(configs)?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// In-memory repository for tests and embedded use.
#[derive(Default)]
pub struct MemoryConfigRepository {
    configs: std::sync::Mutex<HashMap<String, LimitConfig>>,
}

impl MemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: HashMap<String, LimitConfig>) -> Self {
        Self {
            configs: std::sync::Mutex::new(configs),
        }
    }
}

#[async_trait]
impl ConfigRepository for MemoryConfigRepository {
    async fn load(&self) -> Result<HashMap<String, LimitConfig>> {
        Ok(self.configs.lock().unwrap().clone())
    }

    async fn save(&self, configs: &HashMap<String, LimitConfig>) -> Result<()> {
        *self.configs.lock().unwrap() = configs.clone();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Live view of all resource budgets.
///
/// Resources without an entry fall back to the `default` entry, and to the
/// built-in [`LimitConfig::default`] when no `default` entry exists either.
/// Updates are persisted back through the repository.
pub struct LimitRegistry {
    repository: Arc<dyn ConfigRepository>,
    configs: RwLock<HashMap<String, LimitConfig>>,
}

impl LimitRegistry {
    pub async fn load(repository: Arc<dyn ConfigRepository>) -> Result<Self> {
        let configs = repository.load().await?;
        for (resource, config) in &configs {
            config
                .validate()
                .map_err(|e| Error::Config(format!("resource `{resource}`: {e}")))?;
        }
        tracing::debug!(
            entries = configs.len(),
            repository = repository.name(),
            "limit registry loaded"
        );
        Ok(Self {
            repository,
            configs: RwLock::new(configs),
        })
    }

    /// Config for a resource, falling back to the `default` entry.
    pub async fn config_for(&self, resource: &str) -> LimitConfig {
        let configs = self.configs.read().await;
        configs
            .get(resource)
            .or_else(|| configs.get(DEFAULT_RESOURCE))
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a resource's budget at runtime and persist the change.
    pub async fn update(&self, resource: &str, config: LimitConfig) -> Result<()> {
        config.validate()?;
        let snapshot = {
            let mut configs = self.configs.write().await;
            configs.insert(resource.to_string(), config);
            configs.clone()
        };
        self.repository.save(&snapshot).await?;
        tracing::info!(resource, "limit config updated");
        Ok(())
    }

    pub async fn resources(&self) -> Vec<String> {
        self.configs.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_budgets() {
        let mut config = LimitConfig::default();
        config.requests_per_minute = 0;
        assert!(config.validate().is_err());

        let mut config = LimitConfig::default();
        config.burst = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn serde_fills_defaults() {
        let config: LimitConfig =
            serde_json::from_str(r#"{"requests_per_minute": 30, "burst": 5}"#).unwrap();
        assert_eq!(config.strategy, LimitStrategy::TokenBucket);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.max_backoff_secs, 300.0);
        assert_eq!(config.retry_attempts, 3);
        assert!(config.reset_backoff_on_success);
    }

    #[test]
    fn retry_after_floors_at_one_second() {
        let config = LimitConfig::new(120, 10, LimitStrategy::SlidingWindow);
        assert_eq!(config.suggested_retry_after(), Duration::from_secs(1));

        let config = LimitConfig::new(2, 1, LimitStrategy::SlidingWindow);
        assert_eq!(config.suggested_retry_after(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn registry_falls_back_to_default_entry() {
        let mut configs = HashMap::new();
        configs.insert(
            DEFAULT_RESOURCE.to_string(),
            LimitConfig::new(7, 3, LimitStrategy::FixedWindow),
        );
        let repo = Arc::new(MemoryConfigRepository::with_configs(configs));
        let registry = LimitRegistry::load(repo).await.unwrap();

        let config = registry.config_for("unknown-backend").await;
        assert_eq!(config.requests_per_minute, 7);
        assert_eq!(config.strategy, LimitStrategy::FixedWindow);
    }

    #[tokio::test]
    async fn registry_update_persists_through_repository() {
        let repo = Arc::new(MemoryConfigRepository::new());
        let registry = LimitRegistry::load(repo.clone()).await.unwrap();

        registry
            .update("openai", LimitConfig::new(10, 2, LimitStrategy::TokenBucket))
            .await
            .unwrap();

        let stored = repo.load().await.unwrap();
        assert_eq!(stored.get("openai").unwrap().requests_per_minute, 10);
        assert_eq!(registry.config_for("openai").await.burst, 2);
    }

    #[tokio::test]
    async fn registry_rejects_invalid_update() {
        let repo = Arc::new(MemoryConfigRepository::new());
        let registry = LimitRegistry::load(repo).await.unwrap();
        let bad = LimitConfig::new(0, 1, LimitStrategy::TokenBucket);
        assert!(registry.update("x", bad).await.is_err());
    }
}

//! Last-known-good fallback persistence.
//!
//! One entry per `(resource, data_type)` key holding the most recent
//! successful payload. The store enforces no expiry; the saved-at timestamp
//! travels with the entry so staleness is the caller's call. Writes are
//! last-writer-wins with no merge semantics.

use crate::types::unix_timestamp;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// A cached payload with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub payload: serde_json::Value,
    /// Seconds since the Unix epoch when the entry was saved.
    pub saved_at: u64,
    /// Backend that produced the payload.
    pub source: String,
}

/// Storage abstraction for fallback entries, so the medium is swappable
/// without touching orchestration logic.
#[async_trait]
pub trait FallbackRepository: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<FallbackEntry>>;
    async fn save(&self, key: &str, entry: &FallbackEntry) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// One JSON file per key under a base directory.
pub struct FileFallbackRepository {
    dir: PathBuf,
}

impl FileFallbackRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl FallbackRepository for FileFallbackRepository {
    async fn load(&self, key: &str) -> Result<Option<FallbackEntry>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save(&self, key: &str, entry: &FallbackEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(entry)?;
        tokio::fs::write(self.path_for(key), content).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// In-memory repository for tests and ephemeral processes.
#[derive(Default)]
pub struct MemoryFallbackRepository {
    entries: RwLock<HashMap<String, FallbackEntry>>,
}

impl MemoryFallbackRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FallbackRepository for MemoryFallbackRepository {
    async fn load(&self, key: &str) -> Result<Option<FallbackEntry>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn save(&self, key: &str, entry: &FallbackEntry) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Typed façade over a [`FallbackRepository`], keying entries by
/// `(resource, data_type)`.
pub struct FallbackStore {
    repository: Box<dyn FallbackRepository>,
}

impl FallbackStore {
    pub fn new(repository: Box<dyn FallbackRepository>) -> Self {
        Self { repository }
    }

    pub fn key(resource: &str, data_type: &str) -> String {
        format!("{resource}:{data_type}")
    }

    /// Persist the most recent successful payload for a key.
    pub async fn save<T: Serialize>(
        &self,
        resource: &str,
        data_type: &str,
        payload: &T,
        source: &str,
    ) -> Result<()> {
        let entry = FallbackEntry {
            payload: serde_json::to_value(payload)?,
            saved_at: unix_timestamp(),
            source: source.to_string(),
        };
        self.repository
            .save(&Self::key(resource, data_type), &entry)
            .await
    }

    pub async fn load(&self, resource: &str, data_type: &str) -> Result<Option<FallbackEntry>> {
        self.repository.load(&Self::key(resource, data_type)).await
    }

    pub fn backend_name(&self) -> &'static str {
        self.repository.name()
    }
}

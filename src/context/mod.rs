//! Context budgeting: bound a context map to a token estimate before it
//! reaches a backend.
//!
//! Recognized keys are promoted ahead of everything else, entries are then
//! greedily included while the running estimate stays under budget, the
//! first overflowing entry is truncated into a `<key>_partial` remnant, and
//! the rest are dropped. Results are memoized by a content hash so repeated
//! identical contexts skip the work.

use crate::prompt::render_value;
use crate::types::ContextMap;
use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Keys promoted ahead of all others, in this order.
const PRIORITY_KEYS: [&str; 6] = [
    "current_task",
    "user_intent",
    "primary_data",
    "recent_history",
    "constraints",
    "objectives",
];

/// Rough token estimate: one token per four bytes of serialized value.
fn estimate_tokens(serialized: &str) -> u32 {
    (serialized.len() / 4) as u32
}

/// A context bounded to the configured token budget.
#[derive(Debug, Clone, Default)]
pub struct BudgetedContext {
    /// Entries in inclusion order; values are rendered losslessly except
    /// for a possible trailing `<key>_partial` truncation.
    pub entries: Vec<(String, Value)>,
    pub estimated_tokens: u32,
    /// Whether anything was truncated or dropped.
    pub truncated: bool,
}

pub struct ContextBudgeter {
    max_tokens: u32,
    cache: Mutex<LruCache<String, BudgetedContext>>,
}

impl ContextBudgeter {
    pub const DEFAULT_MAX_TOKENS: u32 = 2000;

    pub fn new(max_tokens: u32) -> Self {
        let capacity = NonZeroUsize::new(128).unwrap_or(NonZeroUsize::MIN);
        Self {
            max_tokens,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn optimize(&self, context: &ContextMap) -> BudgetedContext {
        if context.is_empty() {
            return BudgetedContext::default();
        }

        let hash = content_hash(context);
        if let Some(hit) = self.cache.lock().unwrap().get(&hash) {
            return hit.clone();
        }

        let result = self.optimize_uncached(context);
        self.cache.lock().unwrap().put(hash, result.clone());
        result
    }

    fn optimize_uncached(&self, context: &ContextMap) -> BudgetedContext {
        let mut ordered: Vec<(&String, &Value)> = Vec::with_capacity(context.len());
        for key in PRIORITY_KEYS {
            if let Some((k, v)) = context.get_key_value(key) {
                ordered.push((k, v));
            }
        }
        for (k, v) in context.iter() {
            if !PRIORITY_KEYS.contains(&k.as_str()) {
                ordered.push((k, v));
            }
        }

        let mut entries = Vec::new();
        let mut used = 0u32;
        let mut truncated = false;

        for (index, (key, value)) in ordered.iter().copied().enumerate() {
            let serialized = render_value(value);
            let cost = estimate_tokens(&serialized);
            if used + cost <= self.max_tokens {
                used += cost;
                entries.push((key.clone(), value.clone()));
                continue;
            }

            // First overflow: keep what fits under a partial name, drop the
            // rest of the ordering outright.
            truncated = true;
            let remaining = self.max_tokens.saturating_sub(used);
            if remaining > 0 {
                let budget_bytes = remaining as usize * 4;
                let partial = truncate_to_boundary(&serialized, budget_bytes);
                if !partial.is_empty() {
                    used += estimate_tokens(partial);
                    entries.push((format!("{key}_partial"), Value::String(partial.to_string())));
                }
            }
            if index + 1 < ordered.len() {
                tracing::debug!(
                    dropped = ordered.len() - index - 1,
                    "context entries dropped over token budget"
                );
            }
            break;
        }

        BudgetedContext {
            entries,
            estimated_tokens: used,
            truncated,
        }
    }
}

impl Default for ContextBudgeter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_TOKENS)
    }
}

fn content_hash(context: &ContextMap) -> String {
    let canonical = serde_json::to_string(context).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

//! Opinion cache.
//!
//! Identical inputs (same persona, criterion, evidence context and model)
//! reuse an earlier grounded opinion instead of calling the provider again.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tribunal_core::{EvaluatorRole, Opinion};

use crate::config::CacheConfig;

/// Cache key for one evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpinionKey {
    role: EvaluatorRole,
    criterion_id: String,
    context_hash: u64,
    model_hash: u64,
}

impl OpinionKey {
    pub fn new(role: EvaluatorRole, criterion_id: &str, context_hash: u64, model: &str) -> Self {
        Self {
            role,
            criterion_id: criterion_id.to_string(),
            context_hash,
            model_hash: hash_str(model),
        }
    }
}

pub struct OpinionCache {
    cache: Cache<OpinionKey, Opinion>,
}

impl OpinionCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Cache per config, or `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_entries, config.ttl))
    }

    pub async fn get(&self, key: &OpinionKey) -> Option<Opinion> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: OpinionKey, opinion: Opinion) {
        self.cache.insert(key, opinion).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for OpinionCache {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3600))
    }
}

fn hash_str(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

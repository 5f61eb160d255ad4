use crate::config::CacheConfig;
use crate::metrics_defs::{STAGE_CACHE_HIT, STAGE_CACHE_MISS};
use crate::types::{Container, ContainerId, RawItem, UserId};
use moka::future::Cache;
use shared::counter;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// One phase of the resolution pipeline. Each phase is cached on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Identity,
    Containers,
    Items,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Identity => "identity",
            Stage::Containers => "containers",
            Stage::Items => "items",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL cache for a single stage.
///
/// Entries expire lazily `ttl` after they were written. A zero TTL disables
/// caching entirely: every lookup misses and `put` is a no-op.
///
/// [`StageCache::get_or_fetch`] allows at most one fetch in flight per key.
/// Concurrent callers for the same key wait for that fetch instead of
/// issuing their own. Failed fetches are never stored.
pub struct StageCache<K, V> {
    stage: Stage,
    cache: Option<Cache<K, V>>,
}

impl<K, V> StageCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(stage: Stage, ttl: Duration, max_entries: u64) -> Self {
        let cache = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .name(stage.as_str())
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build()
        });

        StageCache { stage, cache }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    pub async fn put(&self, key: K, value: V) {
        if let Some(cache) = &self.cache {
            cache.insert(key, value).await;
        }
    }

    /// Returns the cached value for `key`, running `fetch` to fill the
    /// entry on a miss.
    pub async fn get_or_fetch<F, E>(&self, key: K, fetch: F) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        let Some(cache) = &self.cache else {
            counter!(STAGE_CACHE_MISS, "stage" => self.stage.as_str()).increment(1);
            return fetch.await.map_err(Arc::new);
        };

        let entry = cache.entry(key).or_try_insert_with(fetch).await?;

        let metric_def = if entry.is_fresh() {
            STAGE_CACHE_MISS
        } else {
            STAGE_CACHE_HIT
        };
        counter!(metric_def, "stage" => self.stage.as_str()).increment(1);

        Ok(entry.into_value())
    }
}

/// The caches of every pipeline stage, owned by one pipeline instance.
pub struct StageCaches {
    /// Normalized handle to user id
    pub identity: StageCache<String, UserId>,
    /// User id to the containers it owns, in listing order
    pub containers: StageCache<UserId, Vec<Container>>,
    /// Container id to its unfiltered item listing
    pub items: StageCache<ContainerId, Vec<RawItem>>,
}

impl StageCaches {
    pub fn new(config: &CacheConfig) -> Self {
        let max = config.max_entries_per_stage;
        StageCaches {
            identity: StageCache::new(
                Stage::Identity,
                Duration::from_secs(config.identity_ttl_secs),
                max,
            ),
            containers: StageCache::new(
                Stage::Containers,
                Duration::from_secs(config.containers_ttl_secs),
                max,
            ),
            items: StageCache::new(
                Stage::Items,
                Duration::from_secs(config.items_ttl_secs),
                max,
            ),
        }
    }
}

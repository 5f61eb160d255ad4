use crate::metrics_defs::{NEGATIVE_CACHE_HIT, NEGATIVE_CACHE_MISS};
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;

const MAX_HANDLES: u64 = 1_000;

/// Handles the users upstream answered with "no such account".
///
/// Only confirmed misses are recorded. A lookup that failed (network error,
/// 429) says nothing about the handle and must not be remembered here.
/// A zero TTL turns the set off.
pub struct UnknownHandles {
    handles: Option<Cache<String, ()>>,
}

impl UnknownHandles {
    pub fn new(ttl: Duration) -> Self {
        let handles = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .name("unknown_handles")
                .max_capacity(MAX_HANDLES)
                .time_to_live(ttl)
                .build()
        });
        UnknownHandles { handles }
    }

    pub fn remember(&self, handle: &str) {
        if let Some(handles) = &self.handles {
            handles.insert(handle.to_owned(), ());
        }
    }

    pub fn is_unknown(&self, handle: &str) -> bool {
        let Some(handles) = &self.handles else {
            return false;
        };

        let unknown = handles.contains_key(handle);
        counter!(if unknown {
            NEGATIVE_CACHE_HIT
        } else {
            NEGATIVE_CACHE_MISS
        })
        .increment(1);
        unknown
    }
}

//! Resolves an identity into the purchasable items of every container it
//! owns.
//!
//! Each stage (identity, containers, items) goes through its own cache.
//! Only identity resolution can fail a request. Container listings and item
//! listings that fail degrade to fewer results.

use crate::aggregation::AggregationPolicy;
use crate::config::PipelineConfig;
use crate::fetcher::FetchError;
use crate::metrics_defs::{PIPELINE_CONTAINER_FAILURES, PIPELINE_DURATION};
use crate::stage_cache::StageCaches;
use crate::types::{
    AggregatedResult, ContainerId, ContainerItems, Identity, IdentityInput, RawItem,
};
use crate::unknown_handles::UnknownHandles;
use crate::upstream::UpstreamSource;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("identity not found")]
    IdentityNotFound,
    #[error("internal failure: {0}")]
    InternalFailure(String),
}

// Why a handle lookup produced no id.
#[derive(Debug)]
enum HandleLookupError {
    NotFound,
    Fetch(FetchError),
}

struct PipelineInner {
    source: Arc<dyn UpstreamSource>,
    caches: StageCaches,
    unknown_handles: UnknownHandles,
    max_containers: Option<usize>,
    request_timeout: Duration,
}

#[derive(Clone)]
pub struct ResolutionPipeline {
    inner: Arc<PipelineInner>,
}

impl ResolutionPipeline {
    pub fn new(
        source: Arc<dyn UpstreamSource>,
        caches: StageCaches,
        config: &PipelineConfig,
    ) -> Self {
        ResolutionPipeline {
            inner: Arc::new(PipelineInner {
                source,
                caches,
                unknown_handles: UnknownHandles::new(config.unknown_handle_ttl()),
                max_containers: config.max_containers,
                request_timeout: config.request_timeout(),
            }),
        }
    }

    pub async fn resolve(&self, input: IdentityInput) -> Result<AggregatedResult, PipelineError> {
        let start = Instant::now();

        // On timeout the spawned item tasks keep running and still fill the
        // items cache.
        let result = match tokio::time::timeout(self.inner.request_timeout, self.run(input)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.inner.request_timeout.as_millis() as u64,
                    "resolution timed out"
                );
                Err(PipelineError::InternalFailure("request timed out".into()))
            }
        };

        histogram!(PIPELINE_DURATION).record(start.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, input: IdentityInput) -> Result<AggregatedResult, PipelineError> {
        let identity = self.resolve_identity(input).await?;
        tracing::debug!(user_id = identity.id, handle = ?identity.handle, "identity resolved");

        let source = self.inner.source.clone();
        let user = identity.id;
        let listed = self
            .inner
            .caches
            .containers
            .get_or_fetch(user, async move { source.list_containers(user).await })
            .await;

        let mut containers = match listed {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(user_id = user, error = %e, "could not list containers");
                return Ok(Vec::new());
            }
        };
        if let Some(max) = self.inner.max_containers {
            containers.truncate(max);
        }

        let tasks: Vec<_> = containers
            .into_iter()
            .map(|container| {
                let pipeline = self.clone();
                let id = container.id;
                (container, tokio::spawn(async move { pipeline.items(id).await }))
            })
            .collect();

        let mut result = Vec::with_capacity(tasks.len());
        for (container, task) in tasks {
            let raw = match task.await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    counter!(PIPELINE_CONTAINER_FAILURES).increment(1);
                    tracing::warn!(container_id = container.id, error = %e, "could not list items");
                    continue;
                }
                Err(e) => {
                    counter!(PIPELINE_CONTAINER_FAILURES).increment(1);
                    tracing::error!(container_id = container.id, error = %e, "item task panicked");
                    continue;
                }
            };

            let items = AggregationPolicy::apply(&raw);
            if items.is_empty() {
                continue;
            }
            result.push(ContainerItems {
                container_name: container.display_name,
                container_id: container.id,
                items,
            });
        }

        Ok(result)
    }

    async fn resolve_identity(&self, input: IdentityInput) -> Result<Identity, PipelineError> {
        let handle = match input {
            IdentityInput::Id(id) => return Ok(Identity { handle: None, id }),
            IdentityInput::Handle(handle) => normalize_handle(&handle),
        };
        let Some(handle) = handle else {
            return Err(PipelineError::IdentityNotFound);
        };

        if self.inner.unknown_handles.is_unknown(&handle) {
            return Err(PipelineError::IdentityNotFound);
        }

        let source = self.inner.source.clone();
        let key = handle.clone();
        let lookup = async move {
            match source.resolve_handle(&key).await {
                Ok(Some(id)) => Ok(id),
                Ok(None) => Err(HandleLookupError::NotFound),
                Err(e) => Err(HandleLookupError::Fetch(e)),
            }
        };

        match self
            .inner
            .caches
            .identity
            .get_or_fetch(handle.clone(), lookup)
            .await
        {
            Ok(id) => Ok(Identity {
                handle: Some(handle),
                id,
            }),
            Err(e) => {
                match e.as_ref() {
                    HandleLookupError::NotFound => {
                        tracing::debug!(handle = %handle, "handle is unknown upstream");
                        self.inner.unknown_handles.remember(&handle);
                    }
                    HandleLookupError::Fetch(e) => {
                        tracing::warn!(handle = %handle, error = %e, "could not resolve handle");
                    }
                }
                Err(PipelineError::IdentityNotFound)
            }
        }
    }

    async fn items(&self, container: ContainerId) -> Result<Vec<RawItem>, Arc<FetchError>> {
        let source = self.inner.source.clone();
        self.inner
            .caches
            .items
            .get_or_fetch(container, async move { source.list_items(container).await })
            .await
    }
}

/// Handles are case-insensitive upstream. Blank handles resolve to nothing.
fn normalize_handle(handle: &str) -> Option<String> {
    let handle = handle.trim();
    (!handle.is_empty()).then(|| handle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::stage_cache::{Stage, StageCache};
    use crate::testutils::FakeSource;
    use crate::types::{Container, Item};
    use serde_json::json;

    fn pipeline(source: &Arc<FakeSource>, config: PipelineConfig) -> ResolutionPipeline {
        ResolutionPipeline::new(
            source.clone(),
            StageCaches::new(&CacheConfig::default()),
            &config,
        )
    }

    fn item(id: u64, name: &str, price: u64) -> Item {
        Item {
            id,
            name: name.into(),
            price,
        }
    }

    #[tokio::test]
    async fn test_alice_scenario() {
        let source = Arc::new(FakeSource::alice());
        let pipeline = pipeline(&source, PipelineConfig::default());

        let result = pipeline
            .resolve(IdentityInput::Handle("Alice".into()))
            .await
            .unwrap();

        assert_eq!(
            result,
            vec![
                ContainerItems {
                    container_name: "Tycoon".into(),
                    container_id: 1,
                    items: vec![item(100, "VIP", 50)],
                },
                ContainerItems {
                    container_name: "Sim".into(),
                    container_id: 2,
                    items: vec![item(200, "Boost", 25)],
                },
            ]
        );
        assert_eq!(source.calls(), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_id_without_containers_is_empty() {
        let source = Arc::new(FakeSource::alice());
        let pipeline = pipeline(&source, PipelineConfig::default());

        let result = pipeline.resolve(IdentityInput::Id(99)).await.unwrap();
        assert!(result.is_empty());
        // A raw id skips handle resolution.
        assert_eq!(source.calls(), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_failed_container_listing_is_empty_and_not_cached() {
        let source = Arc::new(FakeSource::alice().with_failing_containers(42));
        let pipeline = pipeline(&source, PipelineConfig::default());

        for _ in 0..2 {
            let result = pipeline.resolve(IdentityInput::Id(42)).await;
            assert_eq!(result, Ok(vec![]));
        }
        assert_eq!(source.calls(), (0, 2, 0));
    }

    #[tokio::test]
    async fn test_unknown_handle_is_remembered() {
        let source = Arc::new(FakeSource::alice());
        let pipeline = pipeline(&source, PipelineConfig::default());

        for _ in 0..3 {
            let result = pipeline.resolve(IdentityInput::Handle("ghost".into())).await;
            assert_eq!(result, Err(PipelineError::IdentityNotFound));
        }
        assert_eq!(source.calls(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_failed_handle_lookup_is_not_remembered() {
        let source = Arc::new(FakeSource::alice().with_failing_handle_lookups());
        let pipeline = pipeline(&source, PipelineConfig::default());

        for _ in 0..2 {
            let result = pipeline.resolve(IdentityInput::Handle("alice".into())).await;
            assert_eq!(result, Err(PipelineError::IdentityNotFound));
        }
        assert_eq!(source.calls(), (2, 0, 0));
    }

    #[tokio::test]
    async fn test_blank_handle_is_not_found() {
        let source = Arc::new(FakeSource::alice());
        let pipeline = pipeline(&source, PipelineConfig::default());

        let result = pipeline.resolve(IdentityInput::Handle("   ".into())).await;
        assert_eq!(result, Err(PipelineError::IdentityNotFound));
        assert_eq!(source.calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_repeat_within_ttl_is_served_from_cache() {
        let source = Arc::new(FakeSource::alice());
        let pipeline = pipeline(&source, PipelineConfig::default());

        let first = pipeline
            .resolve(IdentityInput::Handle("alice".into()))
            .await
            .unwrap();
        // Handles differing only in case and whitespace share the entry.
        let second = pipeline
            .resolve(IdentityInput::Handle(" ALICE ".into()))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_expired_stage_is_fetched_once() {
        let source = Arc::new(FakeSource::alice());
        let caches = StageCaches {
            identity: StageCache::new(Stage::Identity, Duration::from_secs(60), 100),
            containers: StageCache::new(Stage::Containers, Duration::from_secs(60), 100),
            items: StageCache::new(Stage::Items, Duration::from_millis(50), 100),
        };
        let pipeline = ResolutionPipeline::new(source.clone(), caches, &PipelineConfig::default());

        pipeline.resolve(IdentityInput::Id(42)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        pipeline.resolve(IdentityInput::Id(42)).await.unwrap();
        pipeline.resolve(IdentityInput::Id(42)).await.unwrap();

        // One refetch per stale container, nothing for the fresh stages.
        assert_eq!(source.calls(), (0, 1, 4));
    }

    #[tokio::test]
    async fn test_failing_container_is_skipped() {
        let source = Arc::new(
            FakeSource::alice()
                .with_containers(
                    42,
                    vec![
                        Container::new(1, "Tycoon"),
                        Container::new(3, "Broken"),
                        Container::new(2, "Sim"),
                    ],
                )
                .with_failing_items(3),
        );
        let pipeline = pipeline(&source, PipelineConfig::default());

        let result = pipeline.resolve(IdentityInput::Id(42)).await.unwrap();
        let names: Vec<_> = result.iter().map(|c| c.container_name.as_str()).collect();
        assert_eq!(names, vec!["Tycoon", "Sim"]);
    }

    #[tokio::test]
    async fn test_containers_without_valid_items_are_omitted() {
        let source = Arc::new(
            FakeSource::alice()
                .with_items(2, vec![RawItem::new(200, "Offsale", json!(null))]),
        );
        let pipeline = pipeline(&source, PipelineConfig::default());

        let result = pipeline.resolve(IdentityInput::Id(42)).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].container_id, 1);
    }

    #[tokio::test]
    async fn test_max_containers() {
        let source = Arc::new(FakeSource::alice());
        let config = PipelineConfig {
            max_containers: Some(1),
            ..Default::default()
        };
        let pipeline = pipeline(&source, config);

        let result = pipeline.resolve(IdentityInput::Id(42)).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].container_name, "Tycoon");
        assert_eq!(source.calls(), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_timeout_still_fills_cache() {
        let source = Arc::new(FakeSource::alice().with_item_delay(Duration::from_millis(100)));
        let config = PipelineConfig {
            request_timeout_ms: 30,
            ..Default::default()
        };
        let pipeline = pipeline(&source, config);

        let result = pipeline.resolve(IdentityInput::Id(42)).await;
        assert!(matches!(result, Err(PipelineError::InternalFailure(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = pipeline.resolve(IdentityInput::Id(42)).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(source.calls(), (0, 1, 2));
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("  Alice "), Some("alice".to_string()));
        assert_eq!(normalize_handle(""), None);
        assert_eq!(normalize_handle(" \t"), None);
    }
}

use crate::fetcher::FetchError;
use crate::types::{Container, ContainerId, RawItem, UserId};
use crate::upstream::UpstreamSource;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory upstream that counts how often each lookup reaches it.
#[derive(Default)]
pub struct FakeSource {
    handles: HashMap<String, UserId>,
    containers: HashMap<UserId, Vec<Container>>,
    items: HashMap<ContainerId, Vec<RawItem>>,
    failing_containers: HashSet<UserId>,
    failing_items: HashSet<ContainerId>,
    fail_handle_lookups: bool,
    item_delay: Duration,
    pub handle_calls: AtomicUsize,
    pub container_calls: AtomicUsize,
    pub item_calls: AtomicUsize,
}

impl FakeSource {
    /// alice (42) owns Tycoon (1) and Sim (2).
    pub fn alice() -> Self {
        FakeSource::default()
            .with_handle("alice", 42)
            .with_containers(
                42,
                vec![Container::new(1, "Tycoon"), Container::new(2, "Sim")],
            )
            .with_items(
                1,
                vec![
                    RawItem::new(100, "VIP", json!(50)),
                    RawItem::new(101, "Free", json!(0)),
                ],
            )
            .with_items(2, vec![RawItem::new(200, "Boost", json!(25))])
    }

    pub fn with_handle(mut self, handle: &str, id: UserId) -> Self {
        self.handles.insert(handle.to_string(), id);
        self
    }

    pub fn with_containers(mut self, user: UserId, containers: Vec<Container>) -> Self {
        self.containers.insert(user, containers);
        self
    }

    pub fn with_items(mut self, container: ContainerId, items: Vec<RawItem>) -> Self {
        self.items.insert(container, items);
        self
    }

    pub fn with_failing_containers(mut self, user: UserId) -> Self {
        self.failing_containers.insert(user);
        self
    }

    pub fn with_failing_items(mut self, container: ContainerId) -> Self {
        self.failing_items.insert(container);
        self
    }

    pub fn with_failing_handle_lookups(mut self) -> Self {
        self.fail_handle_lookups = true;
        self
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.handle_calls.load(Ordering::SeqCst),
            self.container_calls.load(Ordering::SeqCst),
            self.item_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl UpstreamSource for FakeSource {
    async fn resolve_handle(&self, handle: &str) -> Result<Option<UserId>, FetchError> {
        self.handle_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_handle_lookups {
            return Err(FetchError::RateLimited);
        }
        Ok(self.handles.get(handle).copied())
    }

    async fn list_containers(&self, user: UserId) -> Result<Vec<Container>, FetchError> {
        self.container_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_containers.contains(&user) {
            return Err(FetchError::RateLimited);
        }
        Ok(self.containers.get(&user).cloned().unwrap_or_default())
    }

    async fn list_items(&self, container: ContainerId) -> Result<Vec<RawItem>, FetchError> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        if !self.item_delay.is_zero() {
            tokio::time::sleep(self.item_delay).await;
        }
        if self.failing_items.contains(&container) {
            return Err(FetchError::Upstream(500));
        }
        Ok(self.items.get(&container).cloned().unwrap_or_default())
    }
}

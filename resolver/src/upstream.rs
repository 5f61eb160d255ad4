use crate::fetcher::{FetchError, FetchRequest, RateLimitedFetcher, UpstreamName};
use crate::types::{Container, ContainerId, RawItem, UserId};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

/// The three upstream lookups the pipeline is built from.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// `Ok(None)` when the upstream knows no account with this handle.
    async fn resolve_handle(&self, handle: &str) -> Result<Option<UserId>, FetchError>;

    async fn list_containers(&self, user: UserId) -> Result<Vec<Container>, FetchError>;

    async fn list_items(&self, container: ContainerId) -> Result<Vec<RawItem>, FetchError>;
}

// Every listing endpoint wraps its rows in `data`.
#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

impl Listing {
    // Rows that do not have the expected shape are skipped.
    fn rows<T: DeserializeOwned>(self) -> impl Iterator<Item = T> {
        self.data
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
    }
}

#[derive(Deserialize)]
struct UserRow {
    id: UserId,
}

#[derive(Deserialize)]
struct ContainerRow {
    #[serde(default)]
    id: Option<ContainerId>,
    #[serde(default)]
    name: Option<String>,
}

pub struct HttpUpstreamSource {
    fetcher: Arc<RateLimitedFetcher>,
}

impl HttpUpstreamSource {
    pub fn new(fetcher: Arc<RateLimitedFetcher>) -> Self {
        HttpUpstreamSource { fetcher }
    }
}

#[async_trait]
impl UpstreamSource for HttpUpstreamSource {
    async fn resolve_handle(&self, handle: &str) -> Result<Option<UserId>, FetchError> {
        let request = FetchRequest::post_json(
            UpstreamName::Users,
            "/v1/usernames/users",
            json!({ "usernames": [handle] }),
        );
        let listing: Listing = self.fetcher.fetch(request).await?;

        Ok(listing
            .rows::<UserRow>()
            .next()
            .map(|row| row.id)
            .filter(|id| *id != 0))
    }

    async fn list_containers(&self, user: UserId) -> Result<Vec<Container>, FetchError> {
        let request = FetchRequest::get(UpstreamName::Games, format!("/v2/users/{user}/games"))
            .query("accessFilter", 2)
            .query("limit", 50)
            .query("sortOrder", "Asc");
        let listing: Listing = self.fetcher.fetch(request).await?;

        Ok(listing
            .rows::<ContainerRow>()
            .filter_map(|row| match (row.id, row.name) {
                (Some(id), Some(name)) if id != 0 && !name.is_empty() => {
                    Some(Container::new(id, name))
                }
                _ => None,
            })
            .collect())
    }

    async fn list_items(&self, container: ContainerId) -> Result<Vec<RawItem>, FetchError> {
        let request = FetchRequest::get(
            UpstreamName::Games,
            format!("/v1/games/{container}/game-passes"),
        )
        .query("limit", 100);
        let listing: Listing = self.fetcher.fetch(request).await?;

        Ok(listing.rows().collect())
    }
}

//! Paced HTTP access to the upstream listing services.
//!
//! Every upstream has its own pacer and mirror set. Calls to one upstream
//! never go out closer together than the configured interval, and a 429
//! puts that upstream into cooldown. Nothing is retried here: the caller
//! decides what a failure means.

use crate::config::{CredentialConfig, FetcherConfig, UpstreamConfig, Upstreams};
use crate::metrics_defs::{UPSTREAM_PACING_WAIT, UPSTREAM_RATE_LIMITED, UPSTREAM_REQUESTS};
use crate::mirrors::{MirrorError, MirrorSet, join_path};
use crate::pacer::Pacer;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use shared::{counter, histogram};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpstreamName {
    Users,
    Games,
}

impl UpstreamName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            UpstreamName::Users => "users",
            UpstreamName::Games => "games",
        }
    }
}

/// One outbound call. The path is relative to whichever mirror is picked.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub upstream: UpstreamName,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl FetchRequest {
    pub fn get<P: Into<String>>(upstream: UpstreamName, path: P) -> Self {
        FetchRequest {
            upstream,
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post_json<P: Into<String>>(
        upstream: UpstreamName,
        path: P,
        body: serde_json::Value,
    ) -> Self {
        FetchRequest {
            upstream,
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("upstream responded with status {0}")]
    Upstream(u16),
    #[error("unexpected response body: {0}")]
    Parse(String),
    #[error("upstream requires a credential but none is configured")]
    MissingCredential,
}

impl FetchError {
    fn outcome(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network_error",
            FetchError::RateLimited => "rate_limited",
            FetchError::Upstream(_) => "upstream_error",
            FetchError::Parse(_) => "parse_error",
            FetchError::MissingCredential => "missing_credential",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FetcherBuildError {
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error("invalid credential header: {0}")]
    CredentialHeader(String),
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A header attached to calls to upstreams that require it.
#[derive(Clone)]
pub struct Credential {
    header: HeaderName,
    value: HeaderValue,
}

impl Credential {
    pub fn new(header: &str, value: &str) -> Result<Self, FetcherBuildError> {
        let header = HeaderName::try_from(header)
            .map_err(|e| FetcherBuildError::CredentialHeader(e.to_string()))?;
        let mut value = HeaderValue::try_from(value)
            .map_err(|e| FetcherBuildError::CredentialHeader(e.to_string()))?;
        value.set_sensitive(true);
        Ok(Credential { header, value })
    }

    /// Reads the credential once from the configured environment variable.
    /// An unset or empty variable leaves the service without a credential.
    pub fn from_env(config: &CredentialConfig) -> Result<Option<Self>, FetcherBuildError> {
        match std::env::var(&config.env_var) {
            Ok(value) if !value.is_empty() => Credential::new(&config.header, &value).map(Some),
            _ => {
                tracing::warn!(
                    env_var = %config.env_var,
                    "credential variable is not set, upstreams requiring it will fail"
                );
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

struct Destination {
    mirrors: MirrorSet,
    pacer: Pacer,
    requires_credential: bool,
}

impl Destination {
    fn try_new(
        name: UpstreamName,
        upstream: &UpstreamConfig,
        config: &FetcherConfig,
    ) -> Result<Self, MirrorError> {
        Ok(Destination {
            mirrors: MirrorSet::try_new(name.as_str(), upstream)?,
            pacer: Pacer::new(config.min_interval(), config.cooldown()),
            requires_credential: upstream.requires_credential,
        })
    }
}

pub struct RateLimitedFetcher {
    client: reqwest::Client,
    users: Destination,
    games: Destination,
    credential: Option<Credential>,
    request_timeout: Duration,
}

impl RateLimitedFetcher {
    pub fn new(
        upstreams: &Upstreams,
        config: &FetcherConfig,
        credential: Option<Credential>,
    ) -> Result<Self, FetcherBuildError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(RateLimitedFetcher {
            client,
            users: Destination::try_new(UpstreamName::Users, &upstreams.users, config)?,
            games: Destination::try_new(UpstreamName::Games, &upstreams.games, config)?,
            credential,
            request_timeout: config.request_timeout(),
        })
    }

    /// Sends one request and decodes the JSON response into `T`.
    pub async fn fetch<T: DeserializeOwned>(&self, request: FetchRequest) -> Result<T, FetchError> {
        let upstream = request.upstream;
        let result = self.send(request).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        counter!(UPSTREAM_REQUESTS, "upstream" => upstream.as_str(), "outcome" => outcome)
            .increment(1);

        result
    }

    /// Ready while at least one upstream is outside its cooldown.
    pub fn is_ready(&self) -> bool {
        !self.users.pacer.is_cooling_down() || !self.games.pacer.is_cooling_down()
    }

    fn destination(&self, upstream: UpstreamName) -> &Destination {
        match upstream {
            UpstreamName::Users => &self.users,
            UpstreamName::Games => &self.games,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: FetchRequest) -> Result<T, FetchError> {
        let destination = self.destination(request.upstream);
        let credential = match (&self.credential, destination.requires_credential) {
            (_, false) => None,
            (Some(credential), true) => Some(credential),
            (None, true) => return Err(FetchError::MissingCredential),
        };

        let waited = destination.pacer.acquire().await;
        histogram!(UPSTREAM_PACING_WAIT, "upstream" => request.upstream.as_str())
            .record(waited.as_secs_f64());

        let url = join_path(destination.mirrors.select(), &request.path);
        tracing::debug!(upstream = request.upstream.as_str(), %url, "sending upstream request");

        let mut builder = self
            .client
            .request(request.method, url)
            .timeout(self.request_timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(credential) = credential {
            builder = builder.header(credential.header.clone(), credential.value.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            destination.pacer.start_cooldown();
            counter!(UPSTREAM_RATE_LIMITED, "upstream" => request.upstream.as_str()).increment(1);
            tracing::warn!(
                upstream = request.upstream.as_str(),
                "rate limited, cooling down"
            );
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Upstream(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

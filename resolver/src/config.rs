use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Upstream {0} has no mirrors")]
    NoMirrors(&'static str),

    #[error("Duplicate mirror for upstream {0}: {1}")]
    DuplicateMirror(&'static str, String),

    #[error("Request timeout cannot be 0")]
    ZeroTimeout,

    #[error("max_containers cannot be 0")]
    ZeroMaxContainers,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// How a mirror is picked for each outbound call.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Random,
    RoundRobin,
}

/// A logical upstream served by one or more equivalent mirrors.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    pub mirrors: Vec<Url>,
    #[serde(default)]
    pub selection: SelectionStrategy,
    /// Attach the process credential to calls made to this upstream.
    #[serde(default)]
    pub requires_credential: bool,
}

impl UpstreamConfig {
    fn validate(&self, name: &'static str) -> Result<(), ValidationError> {
        if self.mirrors.is_empty() {
            return Err(ValidationError::NoMirrors(name));
        }
        let mut seen = HashSet::new();
        for mirror in &self.mirrors {
            if !seen.insert(mirror.as_str()) {
                return Err(ValidationError::DuplicateMirror(name, mirror.to_string()));
            }
        }
        Ok(())
    }

    fn from_mirrors(mirrors: &[&str]) -> Self {
        UpstreamConfig {
            mirrors: mirrors
                .iter()
                .filter_map(|m| Url::parse(m).ok())
                .collect(),
            selection: SelectionStrategy::Random,
            requires_credential: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Upstreams {
    /// Handle to id resolution
    #[serde(default = "default_users_upstream")]
    pub users: UpstreamConfig,
    /// Container and item listings
    #[serde(default = "default_games_upstream")]
    pub games: UpstreamConfig,
}

impl Default for Upstreams {
    fn default() -> Self {
        Upstreams {
            users: default_users_upstream(),
            games: default_games_upstream(),
        }
    }
}

fn default_users_upstream() -> UpstreamConfig {
    UpstreamConfig::from_mirrors(&["https://users.roproxy.com"])
}

fn default_games_upstream() -> UpstreamConfig {
    UpstreamConfig::from_mirrors(&["https://games.roproxy.com"])
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetcherConfig {
    /// Minimum spacing between two calls to the same upstream
    pub min_interval_ms: u64,
    /// How long an upstream is left alone after answering 429
    pub cooldown_ms: u64,
    /// Per-call timeout
    pub request_timeout_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            min_interval_ms: 400,
            cooldown_ms: 3_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl FetcherConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Per-stage time to live. A TTL of 0 disables caching for that stage.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub identity_ttl_secs: u64,
    pub containers_ttl_secs: u64,
    pub items_ttl_secs: u64,
    pub max_entries_per_stage: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            identity_ttl_secs: 600,
            containers_ttl_secs: 300,
            items_ttl_secs: 60,
            max_entries_per_stage: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on containers queried for items per request
    pub max_containers: Option<usize>,
    /// Bound on the whole resolution of one request
    pub request_timeout_ms: u64,
    /// How long a handle the upstream does not know is answered locally
    pub unknown_handle_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_containers: None,
            request_timeout_ms: 30_000,
            unknown_handle_ttl_secs: 5,
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn unknown_handle_ttl(&self) -> Duration {
        Duration::from_secs(self.unknown_handle_ttl_secs)
    }
}

/// Where the optional upstream credential comes from and how it is sent.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CredentialConfig {
    /// Environment variable read once at startup
    pub env_var: String,
    /// Header the value is sent in
    #[serde(default = "default_credential_header")]
    pub header: String,
}

fn default_credential_header() -> String {
    "cookie".into()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub admin_listener: Option<Listener>,
    #[serde(default)]
    pub upstreams: Upstreams,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub credential: Option<CredentialConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin) = &self.admin_listener {
            admin.validate()?;
        }

        self.upstreams.users.validate("users")?;
        self.upstreams.games.validate("games")?;

        if self.fetcher.request_timeout_ms == 0 || self.pipeline.request_timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout);
        }

        if self.pipeline.max_containers == Some(0) {
            return Err(ValidationError::ZeroMaxContainers);
        }

        Ok(())
    }
}

use crate::config::{SelectionStrategy, UpstreamConfig};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MirrorError {
    #[error("upstream {0} has no mirrors")]
    Empty(&'static str),
    #[error("mirror {0} is not an http(s) base URL")]
    InvalidMirror(String),
}

/// The equivalent base URLs of one upstream and the rule used to pick one
/// per call. Picks are never sticky.
#[derive(Debug)]
pub struct MirrorSet {
    mirrors: Vec<Url>,
    strategy: SelectionStrategy,
    next: AtomicUsize,
}

impl MirrorSet {
    pub fn try_new(name: &'static str, config: &UpstreamConfig) -> Result<Self, MirrorError> {
        if config.mirrors.is_empty() {
            return Err(MirrorError::Empty(name));
        }

        for mirror in &config.mirrors {
            let is_http = matches!(mirror.scheme(), "http" | "https");
            if !is_http || mirror.cannot_be_a_base() {
                return Err(MirrorError::InvalidMirror(mirror.to_string()));
            }
        }

        Ok(MirrorSet {
            mirrors: config.mirrors.clone(),
            strategy: config.selection,
            next: AtomicUsize::new(0),
        })
    }

    pub fn select(&self) -> &Url {
        let index = match self.mirrors.len() {
            1 => 0,
            len => match self.strategy {
                SelectionStrategy::Random => rand::rng().random_range(0..len),
                SelectionStrategy::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % len,
            },
        };
        &self.mirrors[index]
    }
}

/// Appends `path` to the mirror's own path, so mirrors mounted under a
/// prefix keep it.
pub fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}

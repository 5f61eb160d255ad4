pub mod aggregation;
pub mod api;
pub mod config;
pub mod fetcher;
pub mod metrics_defs;
pub mod mirrors;
pub mod pacer;
pub mod pipeline;
pub mod stage_cache;
#[cfg(test)]
mod testutils;
pub mod types;
pub mod unknown_handles;
pub mod upstream;

use config::{Config, ValidationError};
use fetcher::{Credential, FetcherBuildError, RateLimitedFetcher};
use pipeline::ResolutionPipeline;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use stage_cache::StageCaches;
use std::io;
use std::sync::Arc;
use upstream::HttpUpstreamSource;

#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
    #[error("could not build upstream fetcher: {0}")]
    Fetcher(#[from] FetcherBuildError),
}

pub async fn run(config: Config) -> Result<(), ResolverError> {
    config.validate()?;

    let credential = match &config.credential {
        Some(credential_config) => Credential::from_env(credential_config)?,
        None => None,
    };

    let fetcher = Arc::new(RateLimitedFetcher::new(
        &config.upstreams,
        &config.fetcher,
        credential,
    )?);
    let source = Arc::new(HttpUpstreamSource::new(fetcher.clone()));
    let pipeline = ResolutionPipeline::new(
        source,
        StageCaches::new(&config.cache),
        &config.pipeline,
    );

    let api_task = async {
        api::serve(&config.listener, pipeline)
            .await
            .map_err(ResolverError::from)
    };

    match &config.admin_listener {
        Some(admin) => {
            let admin_service =
                AdminService::<_, ResolverError>::new(move || fetcher.is_ready());
            let admin_task = run_http_service(&admin.host, admin.port, admin_service);
            tokio::try_join!(api_task, admin_task)?;
        }
        None => api_task.await?,
    }

    Ok(())
}

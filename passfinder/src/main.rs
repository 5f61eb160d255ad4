use clap::{Args, Parser};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;

#[derive(Parser)]
enum CliCommand {
    /// Serve pass lookups over HTTP
    Resolver(ResolverArgs),
}

#[derive(Args, Debug)]
struct ResolverArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderAlreadySet,
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Resolver(#[from] resolver::ResolverError),
}

fn main() {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Resolver(args) => run_resolver(args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "passfinder exited with an error");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_resolver(args: ResolverArgs) -> Result<(), CliError> {
    let mut config = Config::from_file(&args.config_file_path)?;
    config.apply_port_override(std::env::var("PORT").ok())?;

    // Flushes pending Sentry events when dropped.
    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    tracing::info!(
        host = %config.resolver.listener.host,
        port = config.resolver.listener.port,
        "starting resolver"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(resolver::run(config.resolver))?;

    Ok(())
}

fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = config
        .and_then(|logging| logging.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(config.prefix.as_str()))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderAlreadySet)?;

    shared::metrics_defs::describe_all(resolver::metrics_defs::ALL_METRICS);
    Ok(())
}

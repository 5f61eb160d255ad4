use resolver::config::Config as ResolverConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "passfinder".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Hosting platforms hand out the listening port through `PORT`.
    pub fn apply_port_override(&mut self, port: Option<String>) -> Result<(), ConfigError> {
        if let Some(port) = port {
            self.resolver.listener.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port))?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid PORT value: {0:?}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolver::config::SelectionStrategy;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn resolver_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: null
            resolver:
                listener:
                    host: 0.0.0.0
                    port: 8080
                upstreams:
                    games:
                        mirrors:
                            - https://games.roproxy.com
                            - https://games.example.com
                        selection: round_robin
                cache:
                    items_ttl_secs: 30
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix, "passfinder");
        assert_eq!(config.common.logging.unwrap().sentry_dsn, None);

        let resolver = config.resolver;
        assert!(resolver.validate().is_ok());
        assert_eq!(resolver.upstreams.games.mirrors.len(), 2);
        assert_eq!(
            resolver.upstreams.games.selection,
            SelectionStrategy::RoundRobin
        );
        assert_eq!(resolver.cache.items_ttl_secs, 30);
        assert_eq!(resolver.cache.identity_ttl_secs, 600);
    }

    #[test]
    fn missing_file() {
        let result = Config::from_file(std::path::Path::new("/nonexistent/passfinder.yaml"));
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn invalid_yaml() {
        let tmp = write_tmp_file("resolver: [not, a, map]");
        let result = Config::from_file(tmp.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn port_override() {
        let tmp = write_tmp_file("resolver: {}");
        let mut config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.resolver.listener.port, 8080);

        config.apply_port_override(None).unwrap();
        assert_eq!(config.resolver.listener.port, 8080);

        config.apply_port_override(Some("3000".into())).unwrap();
        assert_eq!(config.resolver.listener.port, 3000);

        assert!(matches!(
            config.apply_port_override(Some("http".into())),
            Err(ConfigError::InvalidPort(_))
        ));
    }
}

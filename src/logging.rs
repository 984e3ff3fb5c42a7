// 📝 Logging - tracing subscriber shared by the CLI and the server

use crate::config::LoggingConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for
/// this crate and `warn` for everything else
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(format!("warn,finsight={level},tower_http={level}"))
            .map_err(|e| anyhow!("invalid log level '{}': {}", level, e)),
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(&config.level)?;

    let installed = if config.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(env_filter("info").is_ok());
        assert!(env_filter("not a level!").is_err());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
        };
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
    }
}

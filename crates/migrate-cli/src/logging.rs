//! Logging setup
//!
//! Logs go to stderr so that stdout only carries the command report.

use std::io;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logging options derived from the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub json_format: bool,
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub fn default_filter(&self) -> &'static str {
        if self.verbose {
            "migrate_engine=debug,migrate=debug"
        } else {
            "migrate_engine=info,migrate=info"
        }
    }
}

/// Install the global subscriber
pub fn init_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.default_filter()))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let quiet = LoggingConfig::default();
        assert_eq!(quiet.default_filter(), "migrate_engine=info,migrate=info");

        let verbose = LoggingConfig {
            verbose: true,
            json_format: false,
        };
        assert!(EnvFilter::try_new(verbose.default_filter()).is_ok());
    }
}

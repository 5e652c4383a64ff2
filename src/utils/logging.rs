//! Structured logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and to the application named in the config.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::EnvFilter;

fn default_filter(config: &LoggingConfig) -> EnvFilter {
    let level = config.log_level.to_string().to_ascii_lowercase();
    let app = config.app_name.replace('-', "_");
    EnvFilter::new(format!("packet_channel={level},{app}={level}"))
}

/// Install a global `tracing` subscriber.
///
/// # Errors
/// `ConfigError` if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(config.with_thread_ids);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_config_error() {
        let config = LoggingConfig::default();
        // Another test may have installed a subscriber first; either way the
        // second call in this test must fail.
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}

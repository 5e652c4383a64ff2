//! # Configuration Management
//!
//! Centralized configuration for channels, codecs and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`PACKET_CHANNEL_*`)
//! - Direct instantiation with defaults and `default_with_overrides()`
//!
//! ## Security Considerations
//! - `max_frame_size` bounds what a peer can make the framing layer buffer
//! - `max_string_length` and `max_byte_array_length` bound single fields
//! - `handshake_timeout` stops a silent peer from holding a connection open

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default protocol version string of a channel
pub const PROTOCOL_VERSION: &str = "1";

/// Max allowed frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Max characters in a string field
pub const MAX_STRING_LENGTH: usize = 32767;

/// Max bytes in a byte-array field
pub const MAX_BYTE_ARRAY_LENGTH: usize = 1024 * 1024;

/// Default time a connection may take to deliver its hello
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Field codec limits
    #[serde(default)]
    pub codec: CodecConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables.
    ///
    /// Unparseable numeric values are reported as `ConfigError` rather than
    /// silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(version) = std::env::var("PACKET_CHANNEL_PROTOCOL_VERSION") {
            config.channel.protocol_version = version;
        }

        if let Some(val) = env_number::<usize>("PACKET_CHANNEL_MAX_FRAME_SIZE")? {
            config.channel.max_frame_size = val;
        }

        if let Some(val) = env_number::<u64>("PACKET_CHANNEL_HANDSHAKE_TIMEOUT_MS")? {
            config.channel.handshake_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_number::<usize>("PACKET_CHANNEL_MAX_STRING_LENGTH")? {
            config.codec.max_string_length = val;
        }

        if let Some(val) = env_number::<usize>("PACKET_CHANNEL_MAX_BYTE_ARRAY_LENGTH")? {
            config.codec.max_byte_array_length = val;
        }

        if let Ok(level) = std::env::var("PACKET_CHANNEL_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level: {level}"))
            })?;
        }

        if let Ok(json) = std::env::var("PACKET_CHANNEL_LOG_JSON") {
            config.logging.json_format = matches!(json.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.channel.validate());
        errors.extend(self.codec.validate());
        errors.extend(self.logging.validate());

        // A single field must fit in a frame
        if self.codec.max_byte_array_length > self.channel.max_frame_size {
            errors.push(format!(
                "Max byte array length ({}) exceeds max frame size ({})",
                self.codec.max_byte_array_length, self.channel.max_frame_size
            ));
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Version string both endpoints must agree on exactly
    pub protocol_version: String,

    /// Maximum size of one frame, in bytes
    pub max_frame_size: usize,

    /// Time allowed for the peer's hello after connecting
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            protocol_version: String::from(PROTOCOL_VERSION),
            max_frame_size: MAX_FRAME_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.protocol_version.is_empty() {
            errors.push("Protocol version cannot be empty".to_string());
        } else if self.protocol_version.chars().count() > MAX_STRING_LENGTH {
            errors.push("Protocol version is longer than a string field allows".to_string());
        }

        if self.max_frame_size < 64 {
            errors.push("Max frame size too small (minimum: 64 bytes)".to_string());
        } else if self.max_frame_size > 32 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: 32 MiB)",
                self.max_frame_size
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Limits applied by the built-in field codecs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Maximum characters in a UTF-8 string field
    pub max_string_length: usize,

    /// Maximum bytes in a byte-array field
    pub max_byte_array_length: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_string_length: MAX_STRING_LENGTH,
            max_byte_array_length: MAX_BYTE_ARRAY_LENGTH,
        }
    }
}

impl CodecConfig {
    /// Validate codec limits
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_string_length == 0 {
            errors.push("Max string length must be greater than 0".to_string());
        } else if self.max_string_length > MAX_STRING_LENGTH {
            errors.push(format!(
                "Max string length too large: {} (maximum: {MAX_STRING_LENGTH})",
                self.max_string_length
            ));
        }

        if self.max_byte_array_length == 0 {
            errors.push("Max byte array length must be greater than 0".to_string());
        } else if self.max_byte_array_length > i32::MAX as usize {
            errors.push("Max byte array length does not fit a VarInt".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to include thread ids in log lines
    #[serde(default)]
    pub with_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("packet-channel"),
            log_level: Level::INFO,
            json_format: false,
            with_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

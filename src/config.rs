//! Runtime configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! `VIVE_STREAM_*` environment variables override the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `VIVE_STREAM_SERVER_ADDRESS` | `server.address` |
//! | `VIVE_STREAM_SERVER_PORT` | `server.port` |
//! | `VIVE_STREAM_CLIENT_ADDRESS` | `client.address` |
//! | `VIVE_STREAM_CLIENT_PORT` | `client.port` |
//! | `VIVE_STREAM_RETRY_DELAY_MS` | `client.retry_delay_ms` |
//! | `VIVE_STREAM_RECONNECT_ON_READ_ERROR` | `client.reconnect_on_read_error` |
//! | `VIVE_STREAM_OUTPUT_FRAME` | `client.output_frame` (`native` / `consumer`) |
//! | `VIVE_STREAM_DISTANCE_THRESHOLD` | `sampler.distance_threshold` |

use crate::connection::ClientSettings;
use crate::filter::{SampleFilter, DEFAULT_DISTANCE_THRESHOLD};
use crate::ingest::IngestSettings;
use crate::math::FrameConvention;
use crate::protocol::DEFAULT_PORT;
use crate::sampler::SamplerTiming;
use crate::{Result, StreamError};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
}

/// Device side: where the pose server listens.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Consumer side: where to connect and how to behave on failures.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pause before every reconnect attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Also bounds how long shutdown waits on an idle socket.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Treat read errors like a closed peer instead of ending the ingest thread.
    #[serde(default)]
    pub reconnect_on_read_error: bool,
    #[serde(default)]
    pub output_frame: FrameConvention,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SamplerConfig {
    /// Largest accepted jump between consecutive samples, in meters.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    #[serde(default = "default_tracked_interval_ms")]
    pub tracked_interval_ms: u64,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    #[serde(default = "default_idle_reset_ms")]
    pub idle_reset_ms: u64,
}

fn default_server_address() -> String {
    "0.0.0.0".to_string()
}

fn default_client_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_distance_threshold() -> f64 {
    DEFAULT_DISTANCE_THRESHOLD
}

fn default_tracked_interval_ms() -> u64 {
    5
}

fn default_idle_interval_ms() -> u64 {
    50
}

fn default_idle_reset_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            port: default_port(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: default_client_address(),
            port: default_port(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            reconnect_on_read_error: false,
            output_frame: FrameConvention::default(),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_distance_threshold(),
            tracked_interval_ms: default_tracked_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            idle_reset_ms: default_idle_reset_ms(),
        }
    }
}

impl Config {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse TOML without looking at the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VIVE_STREAM_SERVER_ADDRESS") {
            self.server.address = v.trim().to_string();
        }
        read_override(&lookup, "VIVE_STREAM_SERVER_PORT", &mut self.server.port)?;
        if let Some(v) = lookup("VIVE_STREAM_CLIENT_ADDRESS") {
            self.client.address = v.trim().to_string();
        }
        read_override(&lookup, "VIVE_STREAM_CLIENT_PORT", &mut self.client.port)?;
        read_override(&lookup, "VIVE_STREAM_RETRY_DELAY_MS", &mut self.client.retry_delay_ms)?;
        if let Some(v) = lookup("VIVE_STREAM_RECONNECT_ON_READ_ERROR") {
            self.client.reconnect_on_read_error = parse_bool(&v).ok_or_else(|| {
                StreamError::Config(format!("VIVE_STREAM_RECONNECT_ON_READ_ERROR: bad value {:?}", v))
            })?;
        }
        if let Some(v) = lookup("VIVE_STREAM_OUTPUT_FRAME") {
            self.client.output_frame = match v.trim().to_ascii_lowercase().as_str() {
                "native" => FrameConvention::Native,
                "consumer" => FrameConvention::Consumer,
                _ => {
                    return Err(StreamError::Config(format!(
                        "VIVE_STREAM_OUTPUT_FRAME: expected native or consumer, got {:?}",
                        v
                    )))
                }
            };
        }
        read_override(
            &lookup,
            "VIVE_STREAM_DISTANCE_THRESHOLD",
            &mut self.sampler.distance_threshold,
        )?;
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.sampler.distance_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(StreamError::Config(format!(
                "sampler.distance_threshold must be positive, got {}",
                threshold
            )));
        }
        if self.client.read_timeout_ms == 0 || self.client.connect_timeout_ms == 0 {
            return Err(StreamError::Config(
                "client timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            retry_delay: Duration::from_millis(self.client.retry_delay_ms),
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.client.read_timeout_ms),
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            address: self.client.address.clone(),
            port: self.client.port,
            connection: self.client_settings(),
            output_frame: self.client.output_frame,
            reconnect_on_read_error: self.client.reconnect_on_read_error,
        }
    }

    pub fn sampler_timing(&self) -> SamplerTiming {
        SamplerTiming {
            tracked_interval: Duration::from_millis(self.sampler.tracked_interval_ms),
            idle_interval: Duration::from_millis(self.sampler.idle_interval_ms),
            idle_reset: Duration::from_millis(self.sampler.idle_reset_ms),
        }
    }

    pub fn sample_filter(&self) -> SampleFilter {
        SampleFilter::new(self.sampler.distance_threshold)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_override<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(v) = lookup(name) {
        *target = v
            .trim()
            .parse()
            .map_err(|_| StreamError::Config(format!("{}: bad value {:?}", name, v)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.address, "0.0.0.0");
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.client.address, "127.0.0.1");
        assert_eq!(config.client.retry_delay_ms, 1000);
        assert!(!config.client.reconnect_on_read_error);
        assert_eq!(config.client.output_frame, FrameConvention::Consumer);
        assert_eq!(config.sampler.distance_threshold, 0.05);
        assert_eq!(config.sampler.tracked_interval_ms, 5);
        assert_eq!(config.sampler.idle_interval_ms, 50);
    }

    #[test]
    fn test_partial_tables() {
        let config = Config::from_toml_str(
            r#"
            [client]
            port = 4000
            output_frame = "native"

            [sampler]
            distance_threshold = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.client.port, 4000);
        assert_eq!(config.client.address, "127.0.0.1");
        assert_eq!(config.client.output_frame, FrameConvention::Native);
        assert_eq!(config.sampler.distance_threshold, 0.1);
        assert_eq!(config.sampler.idle_reset_ms, 1000);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = Config::from_toml_str("[client]\nport = \"many\"").unwrap_err();
        assert_eq!(err.kind(), "config");
        let err = Config::from_toml_str("[sampler]\ndistance_threshold = -1.0").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("VIVE_STREAM_CLIENT_ADDRESS", " 10.0.0.7 "),
                ("VIVE_STREAM_CLIENT_PORT", "23456"),
                ("VIVE_STREAM_RECONNECT_ON_READ_ERROR", "yes"),
                ("VIVE_STREAM_OUTPUT_FRAME", "Native"),
                ("VIVE_STREAM_DISTANCE_THRESHOLD", "0.08"),
            ]))
            .unwrap();
        assert_eq!(config.client.address, "10.0.0.7");
        assert_eq!(config.client.port, 23456);
        assert!(config.client.reconnect_on_read_error);
        assert_eq!(config.client.output_frame, FrameConvention::Native);
        assert_eq!(config.sampler.distance_threshold, 0.08);
        assert_eq!(config.server.port, 12345);
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("VIVE_STREAM_SERVER_PORT", "70000")]))
            .unwrap_err();
        assert_eq!(err.kind(), "config");
        let err = config
            .apply_overrides(lookup(&[("VIVE_STREAM_OUTPUT_FRAME", "sideways")]))
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_settings_conversion() {
        let config = Config::default();
        let ingest = config.ingest_settings();
        assert_eq!(ingest.port, 12345);
        assert_eq!(ingest.connection.retry_delay, Duration::from_secs(1));
        assert_eq!(ingest.connection.read_timeout, Duration::from_millis(100));
        assert_eq!(config.sampler_timing().tracked_interval, Duration::from_millis(5));
        assert_eq!(config.sample_filter().distance_threshold(), 0.05);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/vive-stream.toml")).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}

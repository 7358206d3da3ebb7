// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::ExecutorOptions;
use crate::config::consts::{
    default_concurrency, DEFAULT_BROKER_RETRIEVE_RETRIES, DEFAULT_BROKER_TIMEOUT, DEFAULT_HOST,
    DEFAULT_IDLE, DEFAULT_MAX_BUFFER_PORTS, DEFAULT_MAX_CONNECTION_ATTEMPTS,
    DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_RESUBMISSIONS, DEFAULT_MAX_STALLS,
    DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE, DEFAULT_WAIT_FACTOR,
    DEFAULT_PORT, DEFAULT_RAW_QUEUE_CAPACITY, DEFAULT_WORKER_POLL_TIMEOUT,
};
use crate::errors::ConfigError;
use crate::network::{ClientOptions, SerializationMode, ServerOptions};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete configuration of a broker process.
///
/// Every section is optional. `thread_pool` and `tcp_server` enable the
/// matching consumer; when neither is present a thread pool with default
/// settings is used.
///
/// # Example
/// ```yaml
/// broker:
///   raw_queue_capacity: 1000
/// thread_pool:
///   threads: 4
/// tcp_server:
///   port: 10000
///   serialization_mode: binary
///   idle_ms: 100
/// tcp_client:
///   max_stalls: 10
/// executor:
///   max_resubmissions: 5
///   wait_factor: 2.0
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    pub thread_pool: Option<ThreadPoolConfig>,
    pub tcp_server: Option<TcpServerConfig>,
    #[serde(default)]
    pub tcp_client: TcpClientConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    /// Capacity of each buffer port's raw queue; 0 for unbounded.
    pub raw_queue_capacity: Option<usize>,
    pub max_buffer_ports: Option<usize>,
}

impl BrokerConfig {
    pub fn get_raw_queue_capacity(&self) -> usize {
        self.raw_queue_capacity.unwrap_or(DEFAULT_RAW_QUEUE_CAPACITY)
    }

    pub fn get_max_buffer_ports(&self) -> usize {
        self.max_buffer_ports.unwrap_or(DEFAULT_MAX_BUFFER_PORTS)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadPoolConfig {
    /// Worker threads; absent uses the hardware concurrency. 0 is passed
    /// on and defaulted, with a warning, by the pool itself.
    pub threads: Option<usize>,
    pub poll_timeout_ms: Option<u64>,
    pub full_return: Option<bool>,
}

impl ThreadPoolConfig {
    pub fn get_threads(&self) -> usize {
        self.threads.unwrap_or_else(default_concurrency)
    }

    pub fn get_poll_timeout(&self) -> Duration {
        self.poll_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WORKER_POLL_TIMEOUT)
    }

    pub fn get_full_return(&self) -> bool {
        self.full_return.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TcpServerConfig {
    pub host: Option<String>,
    /// 0 picks a free port.
    pub port: Option<u16>,
    pub listener_threads: Option<usize>,
    pub serialization_mode: Option<SerializationMode>,
    pub idle_ms: Option<u64>,
    pub broker_timeout_ms: Option<u64>,
    pub broker_retrieve_retries: Option<u32>,
    pub max_payload_size: Option<usize>,
}

impl TcpServerConfig {
    pub fn to_options(&self) -> ServerOptions {
        ServerOptions {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            listener_threads: self.listener_threads.unwrap_or_else(default_concurrency),
            mode: self.serialization_mode.unwrap_or_default(),
            idle: self.idle_ms.map(Duration::from_millis).unwrap_or(DEFAULT_IDLE),
            broker_timeout: self
                .broker_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BROKER_TIMEOUT),
            broker_retrieve_retries: self
                .broker_retrieve_retries
                .unwrap_or(DEFAULT_BROKER_RETRIEVE_RETRIES),
            max_payload_size: self.max_payload_size.unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TcpClientConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_stalls: Option<u32>,
    pub max_connection_attempts: Option<u32>,
    pub process_max: Option<usize>,
    pub max_duration_ms: Option<u64>,
    pub max_payload_size: Option<usize>,
}

impl TcpClientConfig {
    pub fn to_options(&self) -> ClientOptions {
        ClientOptions {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            max_stalls: self.max_stalls.unwrap_or(DEFAULT_MAX_STALLS),
            max_connection_attempts: self
                .max_connection_attempts
                .unwrap_or(DEFAULT_MAX_CONNECTION_ATTEMPTS),
            process_max: self.process_max.unwrap_or(0),
            max_duration: Duration::from_millis(self.max_duration_ms.unwrap_or(0)),
            max_payload_size: self.max_payload_size.unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE),
        }
    }
}

/// Producer-side settings for a [`crate::broker::BrokerExecutor`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorConfig {
    pub max_resubmissions: Option<u32>,
    pub wait_factor: Option<f64>,
    pub min_partial_return_percentage: Option<u16>,
    pub poll_interval_ms: Option<u64>,
}

impl ExecutorConfig {
    /// The executor's raw queue follows `broker.raw_queue_capacity`.
    pub fn to_options(&self, broker: &BrokerConfig) -> ExecutorOptions {
        ExecutorOptions {
            raw_queue_capacity: broker.get_raw_queue_capacity(),
            max_resubmissions: self.max_resubmissions.unwrap_or(DEFAULT_MAX_RESUBMISSIONS),
            wait_factor: self.wait_factor.unwrap_or(DEFAULT_WAIT_FACTOR),
            min_partial_return_percentage: self
                .min_partial_return_percentage
                .unwrap_or(DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WORKER_POLL_TIMEOUT),
        }
    }
}

impl Config {
    /// Whether the local thread pool should run.
    pub fn uses_thread_pool(&self) -> bool {
        self.thread_pool.is_some() || self.tcp_server.is_none()
    }

    /// Rejects values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.get_max_buffer_ports() == 0 {
            return Err(invalid("broker.max_buffer_ports", "must be at least 1"));
        }

        if let Some(server) = &self.tcp_server {
            if server.listener_threads == Some(0) {
                return Err(invalid("tcp_server.listener_threads", "must be at least 1"));
            }
            if server.serialization_mode == Some(SerializationMode::Xml) {
                return Err(invalid(
                    "tcp_server.serialization_mode",
                    "xml has no codec, use text or binary",
                ));
            }
        }

        if let Some(factor) = self.executor.wait_factor {
            if !factor.is_finite() || factor < 0.0 {
                return Err(invalid("executor.wait_factor", "must be a finite, non-negative number"));
            }
        }
        if self.executor.min_partial_return_percentage.is_some_and(|p| p > 100) {
            return Err(invalid("executor.min_partial_return_percentage", "must be at most 100"));
        }

        if self.tcp_client.port == Some(0) {
            return Err(invalid("tcp_client.port", "a client cannot connect to port 0"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Loads a config from a YAML (`.yaml`, `.yml`) or TOML (`.toml`) file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match extension.as_deref() {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
        Some("toml") => Ok(toml::from_str(&content)?),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let cfg = load_config(path)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::StdThreadConsumer;
    use crate::payloads::Multiply;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();

        assert_eq!(cfg.broker.get_raw_queue_capacity(), 10_000);
        assert_eq!(cfg.broker.get_max_buffer_ports(), 10_000);
        assert!(cfg.uses_thread_pool());
        assert!(cfg.tcp_server.is_none());
        assert_eq!(cfg.tcp_client.to_options(), ClientOptions::default());
        assert_eq!(cfg.executor.to_options(&cfg.broker), ExecutorOptions::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
broker:
  raw_queue_capacity: 0
thread_pool:
  threads: 3
  poll_timeout_ms: 50
tcp_server:
  port: 9000
  serialization_mode: text
  idle_ms: 250
tcp_client:
  max_stalls: 0
  process_max: 12
  max_payload_size: 4096
executor:
  max_resubmissions: 0
  wait_factor: 0.0
"#;
        let file = write_temp(".yaml", yaml);
        let cfg = load_and_validate_config(file.path()).unwrap();

        assert_eq!(cfg.broker.get_raw_queue_capacity(), 0);
        let pool = cfg.thread_pool.as_ref().unwrap();
        assert_eq!(pool.get_threads(), 3);
        assert_eq!(pool.get_poll_timeout(), Duration::from_millis(50));
        assert!(pool.get_full_return());

        let server = cfg.tcp_server.as_ref().unwrap().to_options();
        assert_eq!(server.port, 9000);
        assert_eq!(server.mode, SerializationMode::Text);
        assert_eq!(server.idle, Duration::from_millis(250));
        assert_eq!(server.broker_retrieve_retries, 1);

        let client = cfg.tcp_client.to_options();
        assert_eq!(client.max_stalls, 0);
        assert_eq!(client.process_max, 12);
        assert_eq!(client.max_payload_size, 4096);
        assert_eq!(server.max_payload_size, 64 * 1024 * 1024);

        let executor = cfg.executor.to_options(&cfg.broker);
        assert_eq!(executor.raw_queue_capacity, 0);
        assert_eq!(executor.max_resubmissions, 0);
        assert_eq!(executor.wait_factor, 0.0);
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
[tcp_server]
host = "0.0.0.0"
listener_threads = 2

[tcp_client]
host = "server.local"
max_duration_ms = 1500
"#;
        let file = write_temp(".toml", text);
        let cfg = load_config(file.path()).unwrap();

        assert!(!cfg.uses_thread_pool());
        let server = cfg.tcp_server.as_ref().unwrap().to_options();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.listener_threads, 2);
        assert_eq!(server.mode, SerializationMode::Binary);

        let client = cfg.tcp_client.to_options();
        assert_eq!(client.host, "server.local");
        assert_eq!(client.max_duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_threads_reach_the_pool() {
        let pool = ThreadPoolConfig {
            threads: Some(0),
            ..ThreadPoolConfig::default()
        };
        assert_eq!(pool.get_threads(), 0);
        let consumer = StdThreadConsumer::<Multiply>::new(pool.get_threads());
        assert_eq!(consumer.n_threads(), default_concurrency());

        assert_eq!(ThreadPoolConfig::default().get_threads(), default_concurrency());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(".json", "{}");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }

    #[test]
    fn test_malformed_yaml() {
        let file = write_temp(".yml", "broker: [unclosed");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_validation_rejects_broken_values() {
        let cases = [
            ("broker:\n  max_buffer_ports: 0\n", "broker.max_buffer_ports"),
            ("tcp_server:\n  listener_threads: 0\n", "tcp_server.listener_threads"),
            ("tcp_server:\n  serialization_mode: xml\n", "tcp_server.serialization_mode"),
            ("tcp_client:\n  port: 0\n", "tcp_client.port"),
            ("executor:\n  wait_factor: -1.0\n", "executor.wait_factor"),
            ("executor:\n  min_partial_return_percentage: 150\n", "executor.min_partial_return_percentage"),
        ];

        for (yaml, expected_field) in cases {
            let cfg: Config = serde_yaml::from_str(yaml).unwrap();
            match cfg.validate() {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected {expected_field} to be rejected, got {other:?}"),
            }
        }
    }
}

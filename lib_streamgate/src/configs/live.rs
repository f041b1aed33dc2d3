use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::configs::{positive_ms, read_config_file, server_settings, ConfigError, ServerSettings};
use crate::ingestors::source::SourceSettings;
use crate::loggers::LogSettings;

const DEFAULT_CONFIG_FILE: &str = "server_live.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Live data service: Kafka to WebSocket fan-out", version)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    #[clap(long, env = "LIVE_HOST", help = "Address to bind, e.g. 0.0.0.0.")]
    pub host: Option<String>,

    #[clap(long, env = "LIVE_PORT", help = "Port to listen on for subscriber connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "LIVE_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LIVE_LOG_DIR", help = "Directory for rolling log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LIVE_LOG_LEVEL", help = "Log filter used when RUST_LOG is unset (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LIVE_LOG_JSON", help = "Write logs as JSON lines.")]
    pub log_json: Option<bool>,

    #[clap(long, env = "LIVE_LOG_KEEP_FILES", help = "Rolled log files kept at startup.")]
    pub log_keep_files: Option<usize>,

    #[clap(long, env = "LIVE_KAFKA_BROKERS", help = "Kafka bootstrap servers.")]
    pub brokers: Option<String>,

    #[clap(long, env = "LIVE_KAFKA_TOPIC", help = "Topic to consume.")]
    pub topic: Option<String>,

    #[clap(long, env = "LIVE_KAFKA_GROUP_ID", help = "Consumer group id.")]
    pub group_id: Option<String>,

    #[clap(long, env = "LIVE_QUEUE_CAPACITY", help = "Frames buffered per subscriber before it is disconnected.")]
    pub queue_capacity: Option<usize>,

    #[clap(long, env = "LIVE_WRITE_TIMEOUT_MS", help = "Maximum time for one socket write, in milliseconds.")]
    pub write_timeout_ms: Option<u64>,

    #[clap(long, env = "LIVE_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for source reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "LIVE_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for source reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "LIVE_REQUEST_TIMEOUT_SECS", help = "Timeout for plain HTTP requests, in seconds.")]
    pub request_timeout_secs: Option<u64>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Fully resolved live-data settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSettings {
    pub server: ServerSettings,
    pub log: LogSettings,
    pub source: SourceSettings,
    pub queue_capacity: usize,
    pub write_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl LiveConfig {
    /// Built-in defaults, matching the docker-compose deployment.
    pub fn defaults() -> Self {
        Self {
            host: Some("0.0.0.0".to_string()),
            port: Some(8090),
            log_level: Some("info".to_string()),
            log_json: Some(false),
            log_keep_files: Some(7),
            brokers: Some("kafka:9092".to_string()),
            topic: Some("data-lake".to_string()),
            group_id: Some("live-data-consumer".to_string()),
            queue_capacity: Some(256),
            write_timeout_ms: Some(10_000),
            reconnect_base_delay_ms: Some(500),
            reconnect_max_delay_ms: Some(30_000),
            request_timeout_secs: Some(30),
            ..Default::default()
        }
    }

    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: LiveConfig) -> LiveConfig {
        LiveConfig {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_json: other.log_json.or(self.log_json),
            log_keep_files: other.log_keep_files.or(self.log_keep_files),
            brokers: other.brokers.or(self.brokers),
            topic: other.topic.or(self.topic),
            group_id: other.group_id.or(self.group_id),
            queue_capacity: other.queue_capacity.or(self.queue_capacity),
            write_timeout_ms: other.write_timeout_ms.or(self.write_timeout_ms),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    /// # Load
    ///
    /// Layers defaults, the config file (`--config-path`, else
    /// `server_live.conf` when present) and `cli` (flags and environment),
    /// then validates the result.
    pub fn load(cli: LiveConfig) -> Result<LiveSettings, ConfigError> {
        let mut layered = Self::defaults();
        if let Some(file) = read_config_file::<LiveConfig>(cli.config_path.as_deref(), DEFAULT_CONFIG_FILE)? {
            layered = layered.merge(file);
        }
        layered.merge(cli).resolve()
    }

    fn resolve(self) -> Result<LiveSettings, ConfigError> {
        let server = server_settings(
            self.host.as_deref(),
            self.port,
            self.tls_cert_path,
            self.tls_key_path,
            self.request_timeout_secs,
        )?;

        let required = |name: &str, value: Option<String>| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::Invalid(format!("{} must not be empty", name)))
        };
        let source = SourceSettings {
            brokers: required("brokers", self.brokers)?,
            topic: required("topic", self.topic)?,
            group_id: required("groupId", self.group_id)?,
        };

        let queue_capacity = match self.queue_capacity {
            Some(n) if n > 0 => n,
            _ => return Err(ConfigError::Invalid("queueCapacity must be greater than zero".into())),
        };

        let reconnect_base_delay = positive_ms("reconnectBaseDelayMs", self.reconnect_base_delay_ms)?;
        let reconnect_max_delay = positive_ms("reconnectMaxDelayMs", self.reconnect_max_delay_ms)?;
        if reconnect_max_delay < reconnect_base_delay {
            return Err(ConfigError::Invalid(
                "reconnectMaxDelayMs must not be below reconnectBaseDelayMs".into(),
            ));
        }

        let defaults = LogSettings::default();
        Ok(LiveSettings {
            server,
            log: LogSettings {
                dir: self.log_dir,
                level: self.log_level.unwrap_or(defaults.level),
                json: self.log_json.unwrap_or(defaults.json),
                file_prefix: "server_live.log".to_string(),
                keep_files: self.log_keep_files.unwrap_or(defaults.keep_files),
            },
            source,
            queue_capacity,
            write_timeout: positive_ms("writeTimeoutMs", self.write_timeout_ms)?,
            reconnect_base_delay,
            reconnect_max_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_resolve_to_the_compose_deployment() {
        let settings = LiveConfig::defaults().resolve().unwrap();
        assert_eq!(settings.server.bind.port(), 8090);
        assert_eq!(settings.source.brokers, "kafka:9092");
        assert_eq!(settings.source.topic, "data-lake");
        assert_eq!(settings.source.group_id, "live-data-consumer");
        assert_eq!(settings.queue_capacity, 256);
        assert_eq!(settings.reconnect_max_delay, Duration::from_secs(30));
        assert!(settings.server.tls.is_none());
    }

    #[test]
    fn cli_overrides_file_which_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.json");
        fs::write(&path, r#"{ "port": 9100, "topic": "events", "queueCapacity": 32 }"#).unwrap();

        let cli = LiveConfig {
            config_path: Some(path),
            port: Some(9200),
            ..Default::default()
        };
        let settings = LiveConfig::load(cli).unwrap();
        assert_eq!(settings.server.bind.port(), 9200);
        assert_eq!(settings.source.topic, "events");
        assert_eq!(settings.queue_capacity, 32);
        assert_eq!(settings.source.group_id, "live-data-consumer");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let cli = LiveConfig {
            config_path: Some(PathBuf::from("/definitely/not/here.json")),
            ..Default::default()
        };
        assert!(matches!(LiveConfig::load(cli), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_queue = LiveConfig {
            queue_capacity: Some(0),
            ..LiveConfig::defaults()
        };
        assert!(matches!(zero_queue.resolve(), Err(ConfigError::Invalid(_))));

        let inverted_backoff = LiveConfig {
            reconnect_base_delay_ms: Some(5_000),
            reconnect_max_delay_ms: Some(1_000),
            ..LiveConfig::defaults()
        };
        assert!(inverted_backoff.resolve().is_err());

        let half_tls = LiveConfig {
            tls_cert_path: Some(PathBuf::from("cert.pem")),
            ..LiveConfig::defaults()
        };
        assert!(half_tls.resolve().is_err());
    }

    #[test]
    fn flags_parse_into_the_config() {
        let cli = LiveConfig::try_parse_from(["server_live", "--port", "9300", "--log-json", "true"]).unwrap();
        assert_eq!(cli.port, Some(9300));
        assert_eq!(cli.log_json, Some(true));
    }
}

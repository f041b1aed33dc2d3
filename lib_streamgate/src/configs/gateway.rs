use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::cache::TtlPolicy;
use crate::configs::{positive_ms, positive_secs, read_config_file, server_settings, ConfigError, ServerSettings};
use crate::loggers::LogSettings;

const DEFAULT_CONFIG_FILE: &str = "server_gateway.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Gateway: cached static-data proxy and live-data tunnel", version)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[clap(long, env = "GATEWAY_HOST", help = "Address to bind, e.g. 0.0.0.0.")]
    pub host: Option<String>,

    #[clap(long, env = "GATEWAY_PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[clap(long, env = "GATEWAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "GATEWAY_LOG_DIR", help = "Directory for rolling log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "GATEWAY_LOG_LEVEL", help = "Log filter used when RUST_LOG is unset.")]
    pub log_level: Option<String>,

    #[clap(long, env = "GATEWAY_LOG_JSON", help = "Write logs as JSON lines.")]
    pub log_json: Option<bool>,

    #[clap(long, env = "GATEWAY_LOG_KEEP_FILES", help = "Rolled log files kept at startup.")]
    pub log_keep_files: Option<usize>,

    #[clap(long, env = "GATEWAY_UPSTREAM_URL", help = "Base URL of the static-data service.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "GATEWAY_LIVE_UPSTREAM_URL", help = "WebSocket URL the /live tunnel connects to.")]
    pub live_upstream_url: Option<String>,

    #[clap(long, env = "GATEWAY_TTL_LIST_SECS", help = "Cache TTL for the transaction list.")]
    pub ttl_list_secs: Option<u64>,

    #[clap(long, env = "GATEWAY_TTL_FILTERS_SECS", help = "Cache TTL for filter options.")]
    pub ttl_filters_secs: Option<u64>,

    #[clap(long, env = "GATEWAY_TTL_DATES_SECS", help = "Cache TTL for the date range.")]
    pub ttl_dates_secs: Option<u64>,

    #[clap(long, env = "GATEWAY_TTL_BY_ID_SECS", help = "Cache TTL for single transactions.")]
    pub ttl_by_id_secs: Option<u64>,

    #[clap(long, env = "GATEWAY_CACHE_CAPACITY", help = "Maximum cached responses; 0 disables the bound.")]
    pub cache_capacity: Option<usize>,

    #[clap(long, env = "GATEWAY_FETCH_TIMEOUT_MS", help = "Upper bound on one upstream fetch, in milliseconds.")]
    pub fetch_timeout_ms: Option<u64>,

    #[clap(long, env = "GATEWAY_JANITOR_INTERVAL_SECS", help = "How often expired cache entries are purged.")]
    pub janitor_interval_secs: Option<u64>,

    #[clap(long, env = "GATEWAY_EXPOSE_CACHE_HEADERS", help = "Add x-cache, age and cache-control headers.")]
    pub expose_cache_headers: Option<bool>,

    #[clap(long, env = "GATEWAY_TUNNEL_CONNECT_TIMEOUT_MS", help = "Bound on opening the live upstream, in milliseconds.")]
    pub tunnel_connect_timeout_ms: Option<u64>,

    #[clap(long, env = "GATEWAY_TUNNEL_IDLE_TIMEOUT_SECS", help = "A silent tunnel leg is closed after this many seconds.")]
    pub tunnel_idle_timeout_secs: Option<u64>,

    #[clap(long, env = "GATEWAY_REQUEST_TIMEOUT_SECS", help = "Timeout for plain HTTP requests, in seconds.")]
    pub request_timeout_secs: Option<u64>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Fully resolved gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub server: ServerSettings,
    pub log: LogSettings,
    pub upstream_url: Url,
    pub live_upstream_url: Url,
    pub ttl: TtlPolicy,
    /// `None` when unbounded.
    pub cache_capacity: Option<usize>,
    pub fetch_timeout: Duration,
    pub janitor_interval: Duration,
    pub expose_cache_headers: bool,
    pub tunnel_connect_timeout: Duration,
    pub tunnel_idle_timeout: Duration,
}

impl GatewayConfig {
    /// Built-in defaults, matching the docker-compose deployment.
    pub fn defaults() -> Self {
        let ttl = TtlPolicy::default();
        Self {
            host: Some("0.0.0.0".to_string()),
            port: Some(8080),
            log_level: Some("info".to_string()),
            log_json: Some(false),
            log_keep_files: Some(7),
            upstream_url: Some("http://static-data:8081/".to_string()),
            live_upstream_url: Some("ws://live-data:8090/ws/raw".to_string()),
            ttl_list_secs: Some(ttl.list.as_secs()),
            ttl_filters_secs: Some(ttl.filters.as_secs()),
            ttl_dates_secs: Some(ttl.date_range.as_secs()),
            ttl_by_id_secs: Some(ttl.by_id.as_secs()),
            cache_capacity: Some(10_000),
            fetch_timeout_ms: Some(10_000),
            janitor_interval_secs: Some(30),
            expose_cache_headers: Some(true),
            tunnel_connect_timeout_ms: Some(5_000),
            tunnel_idle_timeout_secs: Some(60),
            request_timeout_secs: Some(30),
            ..Default::default()
        }
    }

    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: GatewayConfig) -> GatewayConfig {
        GatewayConfig {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_json: other.log_json.or(self.log_json),
            log_keep_files: other.log_keep_files.or(self.log_keep_files),
            upstream_url: other.upstream_url.or(self.upstream_url),
            live_upstream_url: other.live_upstream_url.or(self.live_upstream_url),
            ttl_list_secs: other.ttl_list_secs.or(self.ttl_list_secs),
            ttl_filters_secs: other.ttl_filters_secs.or(self.ttl_filters_secs),
            ttl_dates_secs: other.ttl_dates_secs.or(self.ttl_dates_secs),
            ttl_by_id_secs: other.ttl_by_id_secs.or(self.ttl_by_id_secs),
            cache_capacity: other.cache_capacity.or(self.cache_capacity),
            fetch_timeout_ms: other.fetch_timeout_ms.or(self.fetch_timeout_ms),
            janitor_interval_secs: other.janitor_interval_secs.or(self.janitor_interval_secs),
            expose_cache_headers: other.expose_cache_headers.or(self.expose_cache_headers),
            tunnel_connect_timeout_ms: other.tunnel_connect_timeout_ms.or(self.tunnel_connect_timeout_ms),
            tunnel_idle_timeout_secs: other.tunnel_idle_timeout_secs.or(self.tunnel_idle_timeout_secs),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    /// # Load
    ///
    /// Same layering as the live-data server: defaults, then the config file
    /// (`--config-path`, else `server_gateway.conf` when present), then `cli`.
    pub fn load(cli: GatewayConfig) -> Result<GatewaySettings, ConfigError> {
        let mut layered = Self::defaults();
        if let Some(file) = read_config_file::<GatewayConfig>(cli.config_path.as_deref(), DEFAULT_CONFIG_FILE)? {
            layered = layered.merge(file);
        }
        layered.merge(cli).resolve()
    }

    fn resolve(self) -> Result<GatewaySettings, ConfigError> {
        let server = server_settings(
            self.host.as_deref(),
            self.port,
            self.tls_cert_path,
            self.tls_key_path,
            self.request_timeout_secs,
        )?;

        let upstream_url = parse_url("upstreamUrl", self.upstream_url.as_deref(), &["http", "https"])?;
        let live_upstream_url = parse_url("liveUpstreamUrl", self.live_upstream_url.as_deref(), &["ws", "wss"])?;

        let ttl = TtlPolicy {
            list: positive_secs("ttlListSecs", self.ttl_list_secs)?,
            filters: positive_secs("ttlFiltersSecs", self.ttl_filters_secs)?,
            date_range: positive_secs("ttlDatesSecs", self.ttl_dates_secs)?,
            by_id: positive_secs("ttlByIdSecs", self.ttl_by_id_secs)?,
        };

        let defaults = LogSettings::default();
        Ok(GatewaySettings {
            server,
            log: LogSettings {
                dir: self.log_dir,
                level: self.log_level.unwrap_or(defaults.level),
                json: self.log_json.unwrap_or(defaults.json),
                file_prefix: "server_gateway.log".to_string(),
                keep_files: self.log_keep_files.unwrap_or(defaults.keep_files),
            },
            upstream_url,
            live_upstream_url,
            ttl,
            cache_capacity: self.cache_capacity.filter(|n| *n > 0),
            fetch_timeout: positive_ms("fetchTimeoutMs", self.fetch_timeout_ms)?,
            janitor_interval: positive_secs("janitorIntervalSecs", self.janitor_interval_secs)?,
            expose_cache_headers: self.expose_cache_headers.unwrap_or(true),
            tunnel_connect_timeout: positive_ms("tunnelConnectTimeoutMs", self.tunnel_connect_timeout_ms)?,
            tunnel_idle_timeout: positive_secs("tunnelIdleTimeoutSecs", self.tunnel_idle_timeout_secs)?,
        })
    }
}

fn parse_url(name: &str, value: Option<&str>, schemes: &[&str]) -> Result<Url, ConfigError> {
    let raw = value.ok_or_else(|| ConfigError::Invalid(format!("{} is required", name)))?;
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("{} '{}': {}", name, raw, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Invalid(format!(
            "{} must use one of {:?}, got '{}'",
            name,
            schemes,
            url.scheme()
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_resolve() {
        let settings = GatewayConfig::defaults().resolve().unwrap();
        assert_eq!(settings.server.bind.port(), 8080);
        assert_eq!(settings.ttl, TtlPolicy::default());
        assert_eq!(settings.cache_capacity, Some(10_000));
        assert_eq!(settings.upstream_url.as_str(), "http://static-data:8081/");
        assert_eq!(settings.live_upstream_url.scheme(), "ws");
        assert!(settings.expose_cache_headers);
        assert_eq!(settings.log.file_prefix, "server_gateway.log");
    }

    #[test]
    fn file_values_are_layered_under_cli() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        fs::write(
            &path,
            r#"{ "ttlByIdSecs": 900, "cacheCapacity": 0, "upstreamUrl": "http://localhost:9000/api/" }"#,
        )
        .unwrap();

        let cli = GatewayConfig {
            config_path: Some(path),
            upstream_url: Some("https://static.internal/".to_string()),
            ..Default::default()
        };
        let settings = GatewayConfig::load(cli).unwrap();
        assert_eq!(settings.ttl.by_id, Duration::from_secs(900));
        assert_eq!(settings.ttl.list, Duration::from_secs(30));
        assert_eq!(settings.cache_capacity, None);
        assert_eq!(settings.upstream_url.as_str(), "https://static.internal/");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        fs::write(&path, "{ not json").unwrap();

        let cli = GatewayConfig {
            config_path: Some(path),
            ..Default::default()
        };
        assert!(matches!(GatewayConfig::load(cli), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn urls_must_use_the_expected_scheme() {
        let http_tunnel = GatewayConfig {
            live_upstream_url: Some("http://live-data:8090/ws/raw".to_string()),
            ..GatewayConfig::defaults()
        };
        assert!(matches!(http_tunnel.resolve(), Err(ConfigError::Invalid(_))));

        let relative = GatewayConfig {
            upstream_url: Some("static-data/".to_string()),
            ..GatewayConfig::defaults()
        };
        assert!(relative.resolve().is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cfg = GatewayConfig {
            ttl_filters_secs: Some(0),
            ..GatewayConfig::defaults()
        };
        assert!(cfg.resolve().is_err());
    }
}

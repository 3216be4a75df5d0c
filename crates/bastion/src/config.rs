//! Configuration record, defaults, file loading, and validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use bastion_common::constants::{
    DEFAULT_CACHE_CLEANUP_INTERVAL_SECS, DEFAULT_CACHE_KEY_PREFIX, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_GRPC_PORT, DEFAULT_HTTP_PORT, DEFAULT_LOG_LEVEL, DEFAULT_RATE_LIMIT_BURST,
    DEFAULT_RATE_LIMIT_QPS, DEFAULT_SERVICE_NAME,
};
use bastion_common::{BastionError, ValidationErrors};

/// Cache backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// In-process store with background expiry sweeping
    #[default]
    Memory,
    /// Remote redis store with server-side expiry
    Redis,
}

impl CacheType {
    /// Whether the backend lives inside this process
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Memory)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("invalid cache_type: {other}, must be memory or redis")),
        }
    }
}

/// Application configuration
///
/// One instance is one snapshot; the [`crate::store::ConfigStore`] replaces
/// snapshots wholesale and never hands out a mutable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Monotonic version stamped by whoever produced the snapshot
    #[serde(default)]
    pub config_version: i64,

    /// Service identity
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// HTTP listener port (not hot-swappable)
    #[serde(default = "default_http_port")]
    pub http_port: String,

    /// RPC listener port (not hot-swappable)
    #[serde(default = "default_grpc_port")]
    pub grpc_port: String,

    /// Cache backend selector
    #[serde(default)]
    pub cache_type: CacheType,

    /// Comma separated `host:port` list for remote backends
    #[serde(default)]
    pub cache_addrs: String,

    #[serde(default)]
    pub cache_username: String,

    #[serde(default)]
    pub cache_password: String,

    /// Prefix applied to every challenge id before it reaches the backend
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,

    /// Entry TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: i64,

    /// In-process sweeper period in seconds
    #[serde(default = "default_cache_cleanup_interval")]
    pub cache_cleanup_interval: i64,

    /// Limiter refill rate (tokens per second)
    #[serde(default = "default_rate_limit_qps")]
    pub rate_limit_qps: i64,

    /// Limiter bucket capacity
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: i64,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Keys accepted on management endpoints (empty disables the check)
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// error, warn, info, debug, trace, none
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub enable_dynamic_config: bool,

    #[serde(default)]
    pub enable_service_discovery: bool,
}

// Default value functions
fn default_service_name() -> String { DEFAULT_SERVICE_NAME.to_string() }
fn default_http_port() -> String { DEFAULT_HTTP_PORT.to_string() }
fn default_grpc_port() -> String { DEFAULT_GRPC_PORT.to_string() }
fn default_cache_key_prefix() -> String { DEFAULT_CACHE_KEY_PREFIX.to_string() }
fn default_cache_ttl() -> i64 { DEFAULT_CACHE_TTL_SECS }
fn default_cache_cleanup_interval() -> i64 { DEFAULT_CACHE_CLEANUP_INTERVAL_SECS }
fn default_rate_limit_qps() -> i64 { DEFAULT_RATE_LIMIT_QPS }
fn default_rate_limit_burst() -> i64 { DEFAULT_RATE_LIMIT_BURST }
fn default_log_level() -> String { DEFAULT_LOG_LEVEL.to_string() }
fn default_true() -> bool { true }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: 0,
            service_name: default_service_name(),
            http_port: default_http_port(),
            grpc_port: default_grpc_port(),
            cache_type: CacheType::default(),
            cache_addrs: String::new(),
            cache_username: String::new(),
            cache_password: String::new(),
            cache_key_prefix: default_cache_key_prefix(),
            cache_ttl: default_cache_ttl(),
            cache_cleanup_interval: default_cache_cleanup_interval(),
            rate_limit_qps: default_rate_limit_qps(),
            rate_limit_burst: default_rate_limit_burst(),
            enable_cors: true,
            api_keys: Vec::new(),
            log_level: default_log_level(),
            enable_dynamic_config: false,
            enable_service_discovery: false,
        }
    }
}

/// Startup-only overrides collected from flags and environment variables.
///
/// Empty strings and zero numbers mean "not set"; boolean toggles can only
/// switch a feature on.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub service_name: Option<String>,
    pub http_port: Option<String>,
    pub grpc_port: Option<String>,
    pub cache_type: Option<CacheType>,
    pub cache_addrs: Option<String>,
    pub cache_username: Option<String>,
    pub cache_password: Option<String>,
    pub cache_ttl: Option<i64>,
    pub cache_key_prefix: Option<String>,
    pub rate_limit_qps: Option<i64>,
    pub rate_limit_burst: Option<i64>,
    /// Comma separated
    pub api_keys: Option<String>,
    pub log_level: Option<String>,
    pub enable_cors: bool,
    pub enable_dynamic_config: bool,
    pub enable_service_discovery: bool,
}

impl AppConfig {
    /// Read and parse a JSON configuration file.
    ///
    /// Unknown fields are ignored and missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, BastionError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .build()
            .map_err(|e| {
                BastionError::Config(format!("failed to read {}: {e}", path.display()))
            })?;

        settings.try_deserialize().map_err(|e| {
            BastionError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Startup loading: a missing or broken file falls back to defaults
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config file, using defaults");
                Self::default()
            }
        }
    }

    /// Apply CLI/environment overrides
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        fn set_str(target: &mut String, value: &Option<String>) {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                *target = v.to_string();
            }
        }
        fn set_num(target: &mut i64, value: Option<i64>) {
            if let Some(v) = value.filter(|v| *v != 0) {
                *target = v;
            }
        }

        set_str(&mut self.service_name, &overrides.service_name);
        set_str(&mut self.http_port, &overrides.http_port);
        set_str(&mut self.grpc_port, &overrides.grpc_port);
        if let Some(cache_type) = overrides.cache_type {
            self.cache_type = cache_type;
        }
        set_str(&mut self.cache_addrs, &overrides.cache_addrs);
        set_str(&mut self.cache_username, &overrides.cache_username);
        set_str(&mut self.cache_password, &overrides.cache_password);
        set_num(&mut self.cache_ttl, overrides.cache_ttl);
        set_str(&mut self.cache_key_prefix, &overrides.cache_key_prefix);
        set_num(&mut self.rate_limit_qps, overrides.rate_limit_qps);
        set_num(&mut self.rate_limit_burst, overrides.rate_limit_burst);
        if let Some(keys) = overrides.api_keys.as_deref().filter(|v| !v.is_empty()) {
            self.api_keys = keys.split(',').map(|k| k.trim().to_string()).collect();
        }
        set_str(&mut self.log_level, &overrides.log_level);

        self.enable_cors |= overrides.enable_cors;
        self.enable_dynamic_config |= overrides.enable_dynamic_config;
        self.enable_service_discovery |= overrides.enable_service_discovery;
    }

    /// Check every documented constraint, collecting all violations
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if !is_valid_port(&self.http_port) {
            errors.push(format!("invalid http_port: {}", self.http_port));
        }
        if !is_valid_port(&self.grpc_port) {
            errors.push(format!("invalid grpc_port: {}", self.grpc_port));
        }
        if !self.cache_type.is_local() && !is_valid_addrs(&self.cache_addrs) {
            errors.push(format!("invalid cache_addrs: {}", self.cache_addrs));
        }
        if self.cache_ttl <= 0 {
            errors.push(format!("cache_ttl must be positive: {}", self.cache_ttl));
        }
        if self.cache_cleanup_interval <= 0 {
            errors.push(format!(
                "cache_cleanup_interval must be positive: {}",
                self.cache_cleanup_interval
            ));
        }
        if self.rate_limit_qps <= 0 {
            errors.push(format!("rate_limit_qps must be positive: {}", self.rate_limit_qps));
        }
        if self.rate_limit_burst <= 0 {
            errors.push(format!("rate_limit_burst must be positive: {}", self.rate_limit_burst));
        }
        if self.api_keys.iter().any(|k| k.is_empty()) {
            errors.push("api_keys contain empty key");
        }

        errors.into_result()
    }

    /// Copy the fields a live reload may change from `incoming`.
    ///
    /// Listener ports, service identity, CORS, and feature toggles stay as
    /// they are until restart.
    pub fn merge_hot_fields(&mut self, incoming: &AppConfig) {
        self.config_version = incoming.config_version;
        self.api_keys = incoming.api_keys.clone();
        self.log_level = incoming.log_level.clone();
        self.cache_type = incoming.cache_type;
        self.cache_addrs = incoming.cache_addrs.clone();
        self.cache_username = incoming.cache_username.clone();
        self.cache_password = incoming.cache_password.clone();
        self.cache_key_prefix = incoming.cache_key_prefix.clone();
        self.cache_ttl = incoming.cache_ttl;
        self.cache_cleanup_interval = incoming.cache_cleanup_interval;
        self.rate_limit_qps = incoming.rate_limit_qps;
        self.rate_limit_burst = incoming.rate_limit_burst;
    }

    /// Copy safe to expose on admin endpoints
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.cache_password.is_empty() {
            copy.cache_password = "******".to_string();
        }
        copy.api_keys = copy.api_keys.iter().map(|_| "******".to_string()).collect();
        copy
    }

    pub fn cache_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.cache_ttl.max(0) as u64)
    }

    pub fn cleanup_interval_duration(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval.max(0) as u64)
    }
}

/// Port must parse as an integer in 1-65535
fn is_valid_port(port: &str) -> bool {
    port.parse::<u32>().is_ok_and(|p| (1..=65535).contains(&p))
}

/// `host:port[,host:port...]`
fn is_valid_addrs(addrs: &str) -> bool {
    if addrs.is_empty() {
        return false;
    }

    addrs.split(',').all(|addr| {
        let Some((host, port)) = addr.rsplit_once(':') else {
            return false;
        };
        !host.is_empty()
            && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
            && !port.is_empty()
            && port.chars().all(|c| c.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.http_port, "8080");
        assert_eq!(config.grpc_port, "50051");
        assert_eq!(config.cache_type, CacheType::Memory);
        assert_eq!(config.cache_ttl, 60);
        assert_eq!(config.rate_limit_qps, 1000);
        assert_eq!(config.rate_limit_burst, 1000);
        assert_eq!(config.cache_key_prefix, "CAPTCHA_DATA:");
        assert!(config.enable_cors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_every_violation() {
        let config = AppConfig {
            http_port: "0".into(),
            grpc_port: "70000".into(),
            cache_type: CacheType::Redis,
            cache_addrs: "localhost".into(),
            cache_ttl: 0,
            rate_limit_qps: -1,
            rate_limit_burst: 0,
            api_keys: vec!["good".into(), String::new()],
            ..Default::default()
        };

        let errors = config.validate().unwrap_err();
        let messages: Vec<&str> = errors.iter().collect();
        assert_eq!(messages.len(), 7);
        assert!(messages[0].starts_with("invalid http_port"));
        assert!(messages[1].starts_with("invalid grpc_port"));
        assert!(messages[2].starts_with("invalid cache_addrs"));
        assert!(messages.contains(&"api_keys contain empty key"));
    }

    #[test]
    fn test_validate_single_constraints() {
        let cases: Vec<fn(&mut AppConfig)> = vec![
            |c| c.http_port = "abc".into(),
            |c| c.grpc_port = "".into(),
            |c| c.cache_ttl = -5,
            |c| c.cache_cleanup_interval = 0,
            |c| c.rate_limit_qps = 0,
            |c| c.rate_limit_burst = -1,
            |c| c.api_keys = vec![String::new()],
            |c| {
                c.cache_type = CacheType::Redis;
                c.cache_addrs = String::new();
            },
        ];

        for mutate in cases {
            let mut config = AppConfig::default();
            mutate(&mut config);
            let errors = config.validate().unwrap_err();
            assert_eq!(errors.len(), 1, "{errors}");
        }
    }

    #[test]
    fn test_addrs_format() {
        assert!(is_valid_addrs("127.0.0.1:6379"));
        assert!(is_valid_addrs("redis-a.local:6379,redis-b.local:6380"));
        assert!(!is_valid_addrs(""));
        assert!(!is_valid_addrs("redis:"));
        assert!(!is_valid_addrs(":6379"));
        assert!(!is_valid_addrs("redis:6379,"));
        assert!(!is_valid_addrs("red is:6379"));
        assert!(!is_valid_addrs("redis:63a9"));
    }

    #[test]
    fn test_memory_backend_ignores_addrs() {
        let config = AppConfig {
            cache_type: CacheType::Memory,
            cache_addrs: "not an address".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_file_with_partial_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"http_port":"9090","cache_ttl":30,"unknown_field":"ignored","api_keys":["k1"]}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.http_port, "9090");
        assert_eq!(config.cache_ttl, 30);
        assert_eq!(config.api_keys, vec!["k1".to_string()]);
        assert_eq!(config.grpc_port, "50051");
        assert_eq!(config.rate_limit_qps, 1000);
        assert!(config.enable_cors);
    }

    #[test]
    fn test_load_rejects_unknown_cache_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cache_type":"etcd"}"#).unwrap();

        assert!(matches!(AppConfig::load(&path), Err(BastionError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default(Path::new("/nonexistent/bastion.json"));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_overrides_skip_empty_values() {
        let mut config = AppConfig {
            enable_cors: false,
            ..Default::default()
        };
        let overrides = ConfigOverrides {
            http_port: Some("9000".into()),
            grpc_port: Some(String::new()),
            cache_type: Some(CacheType::Redis),
            cache_addrs: Some("127.0.0.1:6379".into()),
            cache_ttl: Some(0),
            rate_limit_qps: Some(50),
            api_keys: Some("a, b".into()),
            enable_cors: false,
            enable_dynamic_config: true,
            ..Default::default()
        };

        config.apply_overrides(&overrides);

        assert_eq!(config.http_port, "9000");
        assert_eq!(config.grpc_port, "50051");
        assert_eq!(config.cache_type, CacheType::Redis);
        assert_eq!(config.cache_ttl, 60);
        assert_eq!(config.rate_limit_qps, 50);
        assert_eq!(config.api_keys, vec!["a".to_string(), "b".to_string()]);
        assert!(!config.enable_cors);
        assert!(config.enable_dynamic_config);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_hot_fields_keeps_ports() {
        let mut current = AppConfig::default();
        let incoming = AppConfig {
            config_version: 7,
            http_port: "9191".into(),
            grpc_port: "50052".into(),
            service_name: "renamed".into(),
            cache_ttl: 45,
            cache_key_prefix: "NEW:".into(),
            rate_limit_qps: 10,
            log_level: "debug".into(),
            enable_cors: false,
            ..Default::default()
        };

        current.merge_hot_fields(&incoming);

        assert_eq!(current.config_version, 7);
        assert_eq!(current.http_port, "8080");
        assert_eq!(current.grpc_port, "50051");
        assert_eq!(current.service_name, "bastion");
        assert!(current.enable_cors);
        assert_eq!(current.cache_ttl, 45);
        assert_eq!(current.cache_key_prefix, "NEW:");
        assert_eq!(current.rate_limit_qps, 10);
        assert_eq!(current.log_level, "debug");
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let config = AppConfig {
            cache_password: "hunter2".into(),
            api_keys: vec!["secret-key".into()],
            ..Default::default()
        };
        let redacted = config.redacted();
        assert_eq!(redacted.cache_password, "******");
        assert_eq!(redacted.api_keys, vec!["******".to_string()]);
        assert_eq!(redacted.http_port, config.http_port);
    }
}

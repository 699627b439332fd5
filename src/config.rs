//! Process configuration: `AppConfig` and the per-subsystem configs it
//! aggregates. Loaded from a YAML file and overlaid with `EOD_*`
//! environment variables for secrets, following the env-var precedent set
//! by `db/mod.rs`'s `PG_POOL_SIZE` lookup. `logging.rs` in the teacher
//! referenced a `crate::config::AppConfig` that was never defined anywhere
//! in that codebase; this module defines the real thing.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Ingestion,
    HotPath,
    ColdPath,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default = "default_log_dir")]
    pub directory: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            rotation: LogRotation::Never,
            directory: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Hourly,
    Daily,
    #[default]
    Never,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradesLogConfig {
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    pub consumer_group_id: String,
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default)]
    pub enable_auto_commit: bool,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_commit_every_n")]
    pub commit_every_n: u64,
    #[serde(default = "default_commit_every_secs")]
    pub commit_every_secs: u64,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}
fn default_offset_reset() -> String {
    "earliest".to_string()
}
fn default_max_poll_interval_ms() -> u64 {
    300_000
}
fn default_session_timeout_ms() -> u64 {
    10_000
}
fn default_partitions() -> u32 {
    12
}
fn default_commit_every_n() -> u64 {
    500
}
fn default_commit_every_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    #[serde(default = "default_true")]
    pub idempotence: bool,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_acks() -> String {
    "all".to_string()
}
fn default_linger_ms() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_compression() -> String {
    "lz4".to_string()
}
fn default_batch_size() -> usize {
    65_536
}
fn default_max_retries() -> u32 {
    5
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: default_acks(),
            linger_ms: default_linger_ms(),
            idempotence: true,
            compression: default_compression(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_redis_url")]
    pub connection_string: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_position_prefix")]
    pub position_key_prefix: String,
    #[serde(default = "default_price_prefix")]
    pub price_key_prefix: String,
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    2_000
}
fn default_sync_timeout_ms() -> u64 {
    1_000
}
fn default_connect_retries() -> u32 {
    3
}
fn default_position_prefix() -> String {
    "positions".to_string()
}
fn default_price_prefix() -> String {
    "price".to_string()
}
fn default_channel_prefix() -> String {
    "pnl".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            connection_string: default_redis_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            sync_timeout_ms: default_sync_timeout_ms(),
            connect_retries: default_connect_retries(),
            position_key_prefix: default_position_prefix(),
            price_key_prefix: default_price_prefix(),
            channel_prefix: default_channel_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub connection_string: String,
    #[serde(default = "default_bulk_batch_size")]
    pub bulk_batch_size: usize,
    #[serde(default = "default_bulk_timeout_s")]
    pub bulk_timeout_s: u64,
    #[serde(default = "default_true")]
    pub enable_streaming: bool,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    #[serde(default = "default_command_timeout_s")]
    pub command_timeout_s: u64,
    #[serde(default = "default_flush_age_s")]
    pub flush_age_s: u64,
}

fn default_bulk_batch_size() -> usize {
    5_000
}
fn default_bulk_timeout_s() -> u64 {
    60
}
fn default_max_pool_size() -> u32 {
    10
}
fn default_command_timeout_s() -> u64 {
    60
}
fn default_flush_age_s() -> u64 {
    5
}

impl StoreConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_s)
    }

    pub fn flush_age(&self) -> Duration {
        Duration::from_secs(self.flush_age_s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_root")]
    pub root: String,
}

fn default_archive_root() -> String {
    "archive".to_string()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
        }
    }
}

/// Named circuit-breaker preset, as written in config: `high_availability`,
/// `external_service`, or `storage`, matching `CircuitBreakerConfig`'s own
/// constructors.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerPreset {
    HighAvailability,
    ExternalService,
    Storage,
}

/// A call site's circuit-breaker configuration: a named preset plus
/// optional field overrides, so an operator can start from a preset and
/// tune only what differs for that call site.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSetting {
    pub preset: CircuitBreakerPreset,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub failure_window_s: Option<u64>,
    #[serde(default)]
    pub open_duration_s: Option<u64>,
    #[serde(default)]
    pub success_threshold_half_open: Option<u32>,
}

impl CircuitBreakerSetting {
    pub fn build(&self, name: &str) -> CircuitBreakerConfig {
        let mut config = match self.preset {
            CircuitBreakerPreset::HighAvailability => CircuitBreakerConfig::high_availability(name),
            CircuitBreakerPreset::ExternalService => CircuitBreakerConfig::external_service(name),
            CircuitBreakerPreset::Storage => CircuitBreakerConfig::storage(name),
        };
        if let Some(v) = self.failure_threshold {
            config.failure_threshold = v;
        }
        if let Some(v) = self.failure_window_s {
            config.failure_window = Duration::from_secs(v);
        }
        if let Some(v) = self.open_duration_s {
            config.open_duration = Duration::from_secs(v);
        }
        if let Some(v) = self.success_threshold_half_open {
            config.success_threshold_half_open = v;
        }
        config
    }
}

fn default_archive_breaker() -> CircuitBreakerSetting {
    CircuitBreakerSetting {
        preset: CircuitBreakerPreset::HighAvailability,
        failure_threshold: None,
        failure_window_s: None,
        open_duration_s: None,
        success_threshold_half_open: None,
    }
}

fn default_cache_breaker() -> CircuitBreakerSetting {
    CircuitBreakerSetting {
        preset: CircuitBreakerPreset::Storage,
        failure_threshold: None,
        failure_window_s: None,
        open_duration_s: None,
        success_threshold_half_open: None,
    }
}

/// Per-call-site circuit breaker presets/overrides: one entry per breaker
/// instantiated by the service binaries.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerPresets {
    #[serde(default = "default_archive_breaker")]
    pub archive: CircuitBreakerSetting,
    #[serde(default = "default_cache_breaker")]
    pub cache: CircuitBreakerSetting,
}

impl Default for CircuitBreakerPresets {
    fn default() -> Self {
        Self {
            archive: default_archive_breaker(),
            cache: default_cache_breaker(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub service: ServiceKind,
    #[serde(default)]
    pub log: LoggingConfig,
    pub trades_log: TradesLogConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerPresets,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_health_port() -> u16 {
    8080
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: AppConfig = serde_yaml::from_str(&text)?;
        config.overlay_env();
        Ok(config)
    }

    /// Overlay secrets from the environment, mirroring `db/mod.rs`'s
    /// `PG_POOL_SIZE` precedent.
    fn overlay_env(&mut self) {
        if let Ok(url) = std::env::var("EOD_STORE_URL") {
            self.store.connection_string = url;
        }
        if let Ok(url) = std::env::var("EOD_CACHE_URL") {
            self.cache.connection_string = url;
        }
        if let Ok(servers) = std::env::var("EOD_TRADES_LOG_BOOTSTRAP") {
            self.trades_log.bootstrap_servers = servers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_load_minimal_config() {
        let dir = std::env::temp_dir().join(format!("eod-pipeline-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            r#"
service: hot_path
trades_log:
  consumer_group_id: hotpath-group
store:
  connection_string: "postgres://localhost/test"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.service, ServiceKind::HotPath);
        assert_eq!(config.trades_log.partitions, 12);
        assert_eq!(config.store.bulk_batch_size, 5_000);
        assert_eq!(config.circuit_breakers.archive.build("archive").failure_threshold, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn qa_circuit_breaker_override_replaces_only_named_fields() {
        let setting = CircuitBreakerSetting {
            preset: CircuitBreakerPreset::Storage,
            failure_threshold: Some(20),
            failure_window_s: None,
            open_duration_s: None,
            success_threshold_half_open: None,
        };
        let built = setting.build("cache");
        let preset = CircuitBreakerConfig::storage("cache");

        assert_eq!(built.failure_threshold, 20);
        assert_eq!(built.open_duration, preset.open_duration);
    }
}

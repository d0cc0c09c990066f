//! The shape deserialized directly from YAML. Almost everything is
//! optional here; defaults are applied while converting into
//! [`crate::model::Config`].

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub debug: Option<bool>,
    pub worker: RawWorkerConfig,
    pub database: RawDatabaseConfig,
    pub logging: RawLoggingConfig,
    pub metrics: RawMetricsConfig,
    pub providers: HashMap<String, RawProviderConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawWorkerConfig {
    pub max_concurrent_providers: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawLoggingConfig {
    pub summary_log_path: Option<String>,
    pub summary_interval_min: Option<u64>,
    pub summary_log_max_size_mb: Option<u64>,
    pub summary_log_backup_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawMetricsConfig {
    pub enabled: Option<bool>,
    pub access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawProviderConfig {
    pub provider_type: Option<String>,
    pub enabled: Option<bool>,
    pub keys_path: Option<String>,
    pub api_base_url: Option<String>,
    pub default_model: Option<String>,
    pub shared_key_status: Option<bool>,
    pub streaming_mode: Option<String>,
    pub debug_mode: Option<String>,
    pub models: HashMap<String, RawModelConfig>,
    pub access_control: RawAccessControl,
    pub health_policy: RawHealthPolicy,
    pub proxy_config: RawProxyConfig,
    pub timeouts: RawTimeouts,
    pub gateway_policy: RawGatewayPolicy,
    pub fast_status_mapping: HashMap<u16, String>,
    pub error_parsing_rules: Vec<RawErrorParsingRule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawModelConfig {
    pub endpoint_suffix: Option<String>,
    #[serde(default)]
    pub probe_payload: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawAccessControl {
    pub gateway_access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawHealthPolicy {
    pub on_server_error_min: Option<u64>,
    pub on_overload_min: Option<u64>,
    pub on_other_error_hr: Option<u64>,
    pub on_success_hr: Option<u64>,
    pub on_rate_limit_hr: Option<u64>,
    pub on_no_quota_hr: Option<u64>,
    pub on_invalid_key_days: Option<u64>,
    pub on_no_access_days: Option<u64>,
    pub quarantine_after_days: Option<u64>,
    pub quarantine_recheck_interval_days: Option<u64>,
    pub stop_checking_after_days: Option<u64>,
    pub batch_size: Option<usize>,
    pub batch_delay_sec: Option<u64>,
    pub verification_attempts: Option<u32>,
    pub verification_delay_sec: Option<u64>,
    pub amnesty_threshold_days: Option<u64>,
    pub task_timeout_sec: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawProxyConfig {
    pub mode: Option<String>,
    pub static_url: Option<String>,
    pub pool_list_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawTimeouts {
    pub connect: Option<f64>,
    pub read: Option<f64>,
    pub write: Option<f64>,
    pub pool: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawGatewayPolicy {
    pub retry: RawRetryConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawRetryConfig {
    pub enabled: Option<bool>,
    pub on_key_error: RawKeyErrorRetry,
    pub on_server_error: RawServerErrorRetry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawKeyErrorRetry {
    pub attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawServerErrorRetry {
    pub attempts: Option<u32>,
    pub backoff_sec: Option<f64>,
    pub backoff_factor: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawErrorParsingRule {
    pub status_code: u16,
    pub error_path: String,
    pub regex: String,
    pub map_to: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
}

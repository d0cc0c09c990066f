use std::collections::HashMap;

use keyrelay_common::ErrorReason;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    Google,
    OpenAi,
}

impl ProviderFamily {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "google" | "gemini" => Some(ProviderFamily::Google),
            "openai" | "openai_like" => Some(ProviderFamily::OpenAi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    #[default]
    Disabled,
    HeadersOnly,
    FullBody,
}

impl DebugMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "disabled" => Some(DebugMode::Disabled),
            "headers_only" => Some(DebugMode::HeadersOnly),
            "full_body" => Some(DebugMode::FullBody),
            _ => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        !matches!(self, DebugMode::Disabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    #[default]
    Auto,
    Disabled,
}

impl StreamingMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "auto" => Some(StreamingMode::Auto),
            "disabled" => Some(StreamingMode::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    #[default]
    None,
    Static,
    Stealth,
}

impl ProxyMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(ProxyMode::None),
            "static" => Some(ProxyMode::Static),
            "stealth" => Some(ProxyMode::Stealth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub mode: ProxyMode,
    pub static_url: Option<String>,
    pub pool_list_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub connect_sec: f64,
    pub read_sec: f64,
    pub write_sec: f64,
    pub pool_sec: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { connect_sec: 5.0, read_sec: 20.0, write_sec: 10.0, pool_sec: 5.0 }
    }
}

/// A health/backoff policy, one per provider instance. Field names and
/// defaults match the original system's configuration schema.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub on_server_error_min: u64,
    pub on_overload_min: u64,
    pub on_other_error_hr: u64,
    pub on_success_hr: u64,
    pub on_rate_limit_hr: u64,
    pub on_no_quota_hr: u64,
    pub on_invalid_key_days: u64,
    pub on_no_access_days: u64,
    pub quarantine_after_days: u64,
    pub quarantine_recheck_interval_days: u64,
    pub stop_checking_after_days: u64,
    pub batch_size: usize,
    pub batch_delay_sec: u64,
    pub verification_attempts: u32,
    pub verification_delay_sec: u64,
    pub amnesty_threshold_days: u64,
    pub task_timeout_sec: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            on_server_error_min: 30,
            on_overload_min: 60,
            on_other_error_hr: 1,
            on_success_hr: 2,
            on_rate_limit_hr: 3,
            on_no_quota_hr: 24,
            on_invalid_key_days: 10,
            on_no_access_days: 10,
            quarantine_after_days: 30,
            quarantine_recheck_interval_days: 10,
            stop_checking_after_days: 90,
            batch_size: 30,
            batch_delay_sec: 15,
            verification_attempts: 2,
            verification_delay_sec: 5,
            amnesty_threshold_days: 1,
            task_timeout_sec: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyErrorRetry {
    pub attempts: u32,
}

impl Default for KeyErrorRetry {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct ServerErrorRetry {
    pub attempts: u32,
    pub backoff_sec: f64,
    pub backoff_factor: f64,
}

impl Default for ServerErrorRetry {
    fn default() -> Self {
        Self { attempts: 5, backoff_sec: 0.5, backoff_factor: 2.0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub on_key_error: KeyErrorRetry,
    pub on_server_error: ServerErrorRetry,
}

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub endpoint_suffix: Option<String>,
    pub probe_payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ErrorParsingRule {
    pub status_code: u16,
    pub error_path: String,
    pub regex: Regex,
    pub map_to: ErrorReason,
    pub priority: i32,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub family: ProviderFamily,
    pub enabled: bool,
    pub keys_path: Option<String>,
    pub api_base_url: String,
    pub default_model: Option<String>,
    pub models: HashMap<String, ModelEntry>,
    pub gateway_token: String,
    pub shared_key_status: bool,
    pub streaming_mode: StreamingMode,
    pub debug_mode: DebugMode,
    pub proxy: ProxyConfig,
    pub timeouts: Timeouts,
    pub health_policy: HealthPolicy,
    pub retry_policy: RetryPolicy,
    pub fast_status_mapping: HashMap<u16, ErrorReason>,
    pub error_parsing_rules: Vec<ErrorParsingRule>,
}

impl ProviderConfig {
    /// Precomputed handler mode per §4.1 of the dispatcher design.
    pub fn handler_mode(&self) -> HandlerMode {
        if self.retry_policy.enabled {
            return HandlerMode::BufferedRetryable;
        }
        if self.debug_mode.is_enabled() {
            return HandlerMode::Buffered;
        }
        if self.models.len() == 1 {
            return HandlerMode::FullStream;
        }
        if self.family == ProviderFamily::Google {
            return HandlerMode::FullStream;
        }
        HandlerMode::Buffered
    }

    pub fn sole_model(&self) -> Option<&str> {
        if self.models.len() == 1 {
            self.models.keys().next().map(String::as_str)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    FullStream,
    Buffered,
    BufferedRetryable,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    pub max_concurrent_providers: u32,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl DatabaseConfig {
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5433,
            user: "llm_gateway".to_string(),
            password: String::new(),
            dbname: "llmgateway".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub summary_log_path: String,
    pub summary_interval_min: u64,
    pub summary_log_max_size_mb: u64,
    pub summary_log_backup_count: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            summary_log_path: "logs/summary/".to_string(),
            summary_interval_min: 60,
            summary_log_max_size_mb: 5,
            summary_log_backup_count: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub worker: WorkerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub providers: HashMap<String, ProviderConfig>,
}

impl Config {
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values().filter(|p| p.enabled)
    }
}

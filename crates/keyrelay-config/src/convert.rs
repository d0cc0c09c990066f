use std::collections::HashMap;

use keyrelay_common::ErrorReason;
use regex::Regex;

use crate::error::ConfigError;
use crate::model::*;
use crate::raw::*;

pub fn parse_error_reason(raw: &str) -> Option<ErrorReason> {
    Some(match raw {
        "unknown" => ErrorReason::Unknown,
        "network_error" => ErrorReason::NetworkError,
        "timeout" => ErrorReason::Timeout,
        "server_error" => ErrorReason::ServerError,
        "service_unavailable" => ErrorReason::ServiceUnavailable,
        "overloaded" => ErrorReason::Overloaded,
        "bad_request" => ErrorReason::BadRequest,
        "invalid_key" => ErrorReason::InvalidKey,
        "no_access" => ErrorReason::NoAccess,
        "rate_limited" => ErrorReason::RateLimited,
        "no_quota" => ErrorReason::NoQuota,
        "no_model" => ErrorReason::NoModel,
        _ => return None,
    })
}

/// Converts a fully-substituted [`RawConfig`] into a validated [`Config`].
/// Every problem found is collected so callers see the whole picture in
/// one error instead of fixing their YAML one mistake at a time.
pub fn convert(raw: RawConfig) -> Result<Config, ConfigError> {
    let mut errors = Vec::new();

    let worker = WorkerConfig {
        max_concurrent_providers: raw.worker.max_concurrent_providers.unwrap_or(10),
    };

    let database = DatabaseConfig {
        host: raw.database.host.unwrap_or_else(|| DatabaseConfig::default().host),
        port: raw.database.port.unwrap_or_else(|| DatabaseConfig::default().port),
        user: raw.database.user.unwrap_or_else(|| DatabaseConfig::default().user),
        password: raw.database.password.unwrap_or_default(),
        dbname: raw.database.dbname.unwrap_or_else(|| DatabaseConfig::default().dbname),
    };

    let logging_defaults = LoggingConfig::default();
    let logging = LoggingConfig {
        summary_log_path: raw.logging.summary_log_path.unwrap_or(logging_defaults.summary_log_path),
        summary_interval_min: raw.logging.summary_interval_min.unwrap_or(logging_defaults.summary_interval_min),
        summary_log_max_size_mb: raw
            .logging
            .summary_log_max_size_mb
            .unwrap_or(logging_defaults.summary_log_max_size_mb),
        summary_log_backup_count: raw
            .logging
            .summary_log_backup_count
            .unwrap_or(logging_defaults.summary_log_backup_count),
    };

    let metrics = MetricsConfig {
        enabled: raw.metrics.enabled.unwrap_or(false),
        access_token: raw.metrics.access_token,
    };

    let mut providers = HashMap::new();
    let mut seen_tokens: HashMap<String, String> = HashMap::new();

    for (name, raw_provider) in raw.providers {
        match convert_provider(&name, raw_provider) {
            Ok(provider) => {
                if provider.enabled {
                    if let Some(existing) = seen_tokens.insert(provider.gateway_token.clone(), name.clone()) {
                        errors.push(format!(
                            "providers.{name}: gateway_access_token collides with providers.{existing} (tokens must be unique across enabled instances)"
                        ));
                    }
                }
                providers.insert(name, provider);
            }
            Err(mut provider_errors) => errors.append(&mut provider_errors),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::Invalid(errors));
    }

    Ok(Config { debug: raw.debug.unwrap_or(false), worker, database, logging, metrics, providers })
}

fn convert_provider(name: &str, raw: RawProviderConfig) -> Result<ProviderConfig, Vec<String>> {
    let mut errors = Vec::new();

    let family = raw
        .provider_type
        .as_deref()
        .and_then(ProviderFamily::parse)
        .unwrap_or_else(|| {
            errors.push(format!(
                "providers.{name}.provider_type: missing or unrecognized (expected 'google' or 'openai')"
            ));
            ProviderFamily::OpenAi
        });

    let enabled = raw.enabled.unwrap_or(true);

    let api_base_url = raw.api_base_url.unwrap_or_else(|| {
        errors.push(format!("providers.{name}.api_base_url: required"));
        String::new()
    });

    let gateway_token = raw.access_control.gateway_access_token.unwrap_or_else(|| {
        errors.push(format!("providers.{name}.access_control.gateway_access_token: required"));
        String::new()
    });

    let models: HashMap<String, ModelEntry> = raw
        .models
        .into_iter()
        .map(|(model_name, entry)| {
            (
                model_name,
                ModelEntry { endpoint_suffix: entry.endpoint_suffix, probe_payload: entry.probe_payload },
            )
        })
        .collect();

    if let Some(default_model) = &raw.default_model {
        if !models.contains_key(default_model) {
            errors.push(format!(
                "providers.{name}.default_model: '{default_model}' is not one of the declared models"
            ));
        }
    }

    let streaming_mode = match raw.streaming_mode.as_deref() {
        None => StreamingMode::default(),
        Some(raw_mode) => StreamingMode::parse(raw_mode).unwrap_or_else(|| {
            errors.push(format!("providers.{name}.streaming_mode: invalid value '{raw_mode}'"));
            StreamingMode::default()
        }),
    };

    let debug_mode = match raw.debug_mode.as_deref() {
        None => DebugMode::default(),
        Some(raw_mode) => DebugMode::parse(raw_mode).unwrap_or_else(|| {
            errors.push(format!("providers.{name}.debug_mode: invalid value '{raw_mode}'"));
            DebugMode::default()
        }),
    };

    let proxy = convert_proxy(name, raw.proxy_config, &mut errors);
    let timeouts = convert_timeouts(raw.timeouts);
    let health_policy = convert_health_policy(raw.health_policy);
    let retry_policy = convert_retry_policy(raw.gateway_policy.retry);

    let fast_status_mapping = raw
        .fast_status_mapping
        .into_iter()
        .filter_map(|(code, raw_reason)| match parse_error_reason(&raw_reason) {
            Some(reason) => Some((code, reason)),
            None => {
                errors.push(format!(
                    "providers.{name}.fast_status_mapping[{code}]: unknown error reason '{raw_reason}'"
                ));
                None
            }
        })
        .collect();

    let error_parsing_rules = raw
        .error_parsing_rules
        .into_iter()
        .filter_map(|rule| convert_error_parsing_rule(name, rule, &mut errors))
        .collect();

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ProviderConfig {
        name: name.to_string(),
        family,
        enabled,
        keys_path: raw.keys_path,
        api_base_url,
        default_model: raw.default_model,
        models,
        gateway_token,
        shared_key_status: raw.shared_key_status.unwrap_or(false),
        streaming_mode,
        debug_mode,
        proxy,
        timeouts,
        health_policy,
        retry_policy,
        fast_status_mapping,
        error_parsing_rules,
    })
}

fn convert_proxy(name: &str, raw: RawProxyConfig, errors: &mut Vec<String>) -> ProxyConfig {
    let mode = match raw.mode.as_deref() {
        None => ProxyMode::default(),
        Some(raw_mode) => ProxyMode::parse(raw_mode).unwrap_or_else(|| {
            errors.push(format!("providers.{name}.proxy_config.mode: invalid value '{raw_mode}'"));
            ProxyMode::default()
        }),
    };

    if mode == ProxyMode::Static && raw.static_url.is_none() {
        errors.push(format!("providers.{name}.proxy_config: mode 'static' requires 'static_url'"));
    }
    if mode == ProxyMode::Stealth && raw.pool_list_path.is_none() {
        errors.push(format!("providers.{name}.proxy_config: mode 'stealth' requires 'pool_list_path'"));
    }

    ProxyConfig { mode, static_url: raw.static_url, pool_list_path: raw.pool_list_path }
}

fn convert_timeouts(raw: RawTimeouts) -> Timeouts {
    let defaults = Timeouts::default();
    Timeouts {
        connect_sec: raw.connect.unwrap_or(defaults.connect_sec),
        read_sec: raw.read.unwrap_or(defaults.read_sec),
        write_sec: raw.write.unwrap_or(defaults.write_sec),
        pool_sec: raw.pool.unwrap_or(defaults.pool_sec),
    }
}

fn convert_health_policy(raw: RawHealthPolicy) -> HealthPolicy {
    let d = HealthPolicy::default();
    HealthPolicy {
        on_server_error_min: raw.on_server_error_min.unwrap_or(d.on_server_error_min),
        on_overload_min: raw.on_overload_min.unwrap_or(d.on_overload_min),
        on_other_error_hr: raw.on_other_error_hr.unwrap_or(d.on_other_error_hr),
        on_success_hr: raw.on_success_hr.unwrap_or(d.on_success_hr),
        on_rate_limit_hr: raw.on_rate_limit_hr.unwrap_or(d.on_rate_limit_hr),
        on_no_quota_hr: raw.on_no_quota_hr.unwrap_or(d.on_no_quota_hr),
        on_invalid_key_days: raw.on_invalid_key_days.unwrap_or(d.on_invalid_key_days),
        on_no_access_days: raw.on_no_access_days.unwrap_or(d.on_no_access_days),
        quarantine_after_days: raw.quarantine_after_days.unwrap_or(d.quarantine_after_days),
        quarantine_recheck_interval_days: raw
            .quarantine_recheck_interval_days
            .unwrap_or(d.quarantine_recheck_interval_days),
        stop_checking_after_days: raw.stop_checking_after_days.unwrap_or(d.stop_checking_after_days),
        batch_size: raw.batch_size.unwrap_or(d.batch_size),
        batch_delay_sec: raw.batch_delay_sec.unwrap_or(d.batch_delay_sec),
        verification_attempts: raw.verification_attempts.unwrap_or(d.verification_attempts),
        verification_delay_sec: raw.verification_delay_sec.unwrap_or(d.verification_delay_sec),
        amnesty_threshold_days: raw.amnesty_threshold_days.unwrap_or(d.amnesty_threshold_days),
        task_timeout_sec: raw.task_timeout_sec.unwrap_or(d.task_timeout_sec),
    }
}

fn convert_retry_policy(raw: RawRetryConfig) -> RetryPolicy {
    let key_defaults = KeyErrorRetry::default();
    let server_defaults = ServerErrorRetry::default();
    RetryPolicy {
        enabled: raw.enabled.unwrap_or(false),
        on_key_error: KeyErrorRetry { attempts: raw.on_key_error.attempts.unwrap_or(key_defaults.attempts) },
        on_server_error: ServerErrorRetry {
            attempts: raw.on_server_error.attempts.unwrap_or(server_defaults.attempts),
            backoff_sec: raw.on_server_error.backoff_sec.unwrap_or(server_defaults.backoff_sec),
            backoff_factor: raw.on_server_error.backoff_factor.unwrap_or(server_defaults.backoff_factor),
        },
    }
}

/// A malformed rule (bad regex, unknown `map_to`) is logged and dropped
/// rather than failing config load: it only narrows the targeted-parsing
/// stage, the default status-code table still classifies the response.
fn convert_error_parsing_rule(
    provider_name: &str,
    raw: RawErrorParsingRule,
    _errors: &mut Vec<String>,
) -> Option<ErrorParsingRule> {
    let regex = match Regex::new(&raw.regex) {
        Ok(regex) => regex,
        Err(err) => {
            tracing::warn!(
                provider = provider_name,
                regex = raw.regex.as_str(),
                error = %err,
                "skipping error_parsing_rule with invalid regex"
            );
            return None;
        }
    };

    let map_to = match parse_error_reason(&raw.map_to) {
        Some(reason) => reason,
        None => {
            tracing::warn!(
                provider = provider_name,
                map_to = raw.map_to.as_str(),
                "skipping error_parsing_rule with unknown map_to"
            );
            return None;
        }
    };

    Some(ErrorParsingRule {
        status_code: raw.status_code,
        error_path: raw.error_path,
        regex,
        map_to,
        priority: raw.priority,
        description: raw.description,
    })
}

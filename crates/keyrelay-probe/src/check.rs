use keyrelay_common::{CheckResult, ErrorReason};
use keyrelay_config::{HealthPolicy, ProviderConfig};
use keyrelay_provider_core::adapter::ProviderAdapter;
use keyrelay_storage::ProbeCandidate;
use time::{Duration as TimeDuration, OffsetDateTime};

/// Runs one credential's full check, including the verification loop for a
/// retryable first outcome, and returns the durable status update (§4.9).
pub async fn check_one(
    adapter: &dyn ProviderAdapter,
    client: &wreq::Client,
    base_url: &str,
    config: &ProviderConfig,
    candidate: &ProbeCandidate,
) -> keyrelay_storage::StatusUpdate {
    let Some((probe_path, probe_payload)) = resolve_probe_target(config, &candidate.model_name) else {
        tracing::warn!(
            provider = %candidate.provider_name,
            model = %candidate.model_name,
            "no configured model to probe against; leaving status unchanged"
        );
        return build_update(candidate, &config.health_policy, CheckResult::fail(ErrorReason::Unknown, "no probe target"));
    };

    let mut result = adapter.check(client, base_url, &candidate.key_value, probe_path, probe_payload).await;
    apply_worker_overrides(&mut result, config);

    if !result.ok {
        let reason = result.reason_or_unknown();
        if reason.is_retryable() {
            result = verify(adapter, client, base_url, probe_path, probe_payload, &candidate.key_value, &config.health_policy, result)
                .await;
            apply_worker_overrides(&mut result, config);
        }
    }

    build_update(candidate, &config.health_policy, result)
}

/// Worker-specific reclassification (§4.6, "Worker-specific override"): a
/// per-instance `fast_status_mapping` entry takes priority, and failing
/// that, a bare HTTP 400 is remapped to `invalid_key` because the probe's
/// request shape is fixed by us, so the upstream can only be objecting to
/// the credential, never to a malformed caller request.
fn apply_worker_overrides(result: &mut CheckResult, config: &ProviderConfig) {
    if result.ok {
        return;
    }
    let Some(status) = result.status_code else { return };

    if let Some(&mapped) = config.fast_status_mapping.get(&status) {
        result.reason = Some(mapped);
    } else if status == 400 {
        result.reason = Some(ErrorReason::InvalidKey);
    }
}

async fn verify(
    adapter: &dyn ProviderAdapter,
    client: &wreq::Client,
    base_url: &str,
    probe_path: &str,
    probe_payload: &serde_json::Value,
    token: &str,
    policy: &HealthPolicy,
    mut last: CheckResult,
) -> CheckResult {
    for _ in 0..policy.verification_attempts {
        tokio::time::sleep(std::time::Duration::from_secs(policy.verification_delay_sec)).await;
        let attempt = adapter.check(client, base_url, token, probe_path, probe_payload).await;
        if attempt.ok {
            return attempt;
        }
        let reason = attempt.reason_or_unknown();
        last = attempt;
        if reason.is_fatal() {
            return last;
        }
    }
    last
}

fn resolve_probe_target<'a>(config: &'a ProviderConfig, model_name: &str) -> Option<(&'a str, &'a serde_json::Value)> {
    let entry = if model_name == keyrelay_common::ALL_MODELS_MARKER {
        config.models.iter().min_by_key(|(name, _)| name.as_str()).map(|(_, entry)| entry)
    } else {
        config.models.get(model_name)
    }?;
    Some((entry.endpoint_suffix.as_deref().unwrap_or(""), &entry.probe_payload))
}

/// Computes the next-check time in priority order (§4.9) and builds the
/// durable update, applying downtime amnesty before the reason-based rules.
fn build_update(candidate: &ProbeCandidate, policy: &HealthPolicy, result: CheckResult) -> keyrelay_storage::StatusUpdate {
    let now = OffsetDateTime::now_utc();

    let gap = now - candidate.scheduled_next_check;
    let amnestied = gap > TimeDuration::days(policy.amnesty_threshold_days as i64);
    let failing_since = if amnestied { None } else { candidate.failing_since };

    let next_check_time = compute_next_check_time(policy, &result, failing_since, now);

    let model_name = if candidate.model_name == keyrelay_common::ALL_MODELS_MARKER {
        None
    } else {
        Some(candidate.model_name.clone())
    };

    keyrelay_storage::StatusUpdate::from_check(
        candidate.credential_id,
        model_name,
        result.ok,
        result.reason,
        result.status_code,
        result.response_time_ms,
        result.error_message,
        next_check_time,
    )
}

fn compute_next_check_time(
    policy: &HealthPolicy,
    result: &CheckResult,
    failing_since: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> OffsetDateTime {
    if result.ok {
        return now + TimeDuration::hours(policy.on_success_hr as i64);
    }

    if let Some(since) = failing_since {
        let failing_days = (now - since).whole_days();
        if failing_days > policy.stop_checking_after_days as i64 {
            return now + TimeDuration::days(365);
        }
        if failing_days > policy.quarantine_after_days as i64 {
            return now + TimeDuration::days(policy.quarantine_recheck_interval_days as i64);
        }
    }

    match result.reason_or_unknown() {
        ErrorReason::InvalidKey => now + TimeDuration::days(policy.on_invalid_key_days as i64),
        ErrorReason::NoAccess => now + TimeDuration::days(policy.on_no_access_days as i64),
        ErrorReason::RateLimited => now + TimeDuration::hours(policy.on_rate_limit_hr as i64),
        ErrorReason::NoQuota => now + TimeDuration::hours(policy.on_no_quota_hr as i64),
        ErrorReason::Overloaded => now + TimeDuration::minutes(policy.on_overload_min as i64),
        ErrorReason::ServerError | ErrorReason::NetworkError | ErrorReason::Timeout | ErrorReason::ServiceUnavailable => {
            now + TimeDuration::minutes(policy.on_server_error_min as i64)
        }
        ErrorReason::BadRequest | ErrorReason::Unknown | ErrorReason::NoModel => {
            now + TimeDuration::hours(policy.on_other_error_hr as i64)
        }
    }
}

/// Provider missing from the loaded configuration at update time (§4.9): a
/// config/DB mismatch that should not occur in steady state.
pub fn fallback_update_for_missing_provider(candidate: &ProbeCandidate, result: CheckResult) -> keyrelay_storage::StatusUpdate {
    tracing::warn!(
        provider = %candidate.provider_name,
        credential_id = candidate.credential_id,
        "provider no longer present in loaded configuration; applying 24h fallback reschedule"
    );
    let model_name =
        if candidate.model_name == keyrelay_common::ALL_MODELS_MARKER { None } else { Some(candidate.model_name.clone()) };
    keyrelay_storage::StatusUpdate::from_check(
        candidate.credential_id,
        model_name,
        result.ok,
        result.reason,
        result.status_code,
        result.response_time_ms,
        result.error_message,
        OffsetDateTime::now_utc() + TimeDuration::hours(24),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_config::{HealthPolicy, ProviderFamily};
    use std::collections::HashMap;

    fn provider_config(fast_status_mapping: HashMap<u16, ErrorReason>) -> ProviderConfig {
        ProviderConfig {
            name: "openai-main".to_string(),
            family: ProviderFamily::OpenAi,
            enabled: true,
            keys_path: None,
            api_base_url: "https://api.openai.com".to_string(),
            default_model: None,
            models: HashMap::new(),
            gateway_token: "gw-token".to_string(),
            shared_key_status: false,
            streaming_mode: Default::default(),
            debug_mode: Default::default(),
            proxy: Default::default(),
            timeouts: Default::default(),
            health_policy: HealthPolicy::default(),
            retry_policy: Default::default(),
            fast_status_mapping,
            error_parsing_rules: Vec::new(),
        }
    }

    #[test]
    fn worker_override_maps_bare_400_to_invalid_key() {
        let config = provider_config(HashMap::new());
        let mut result = CheckResult::fail_with_status(ErrorReason::Unknown, 400, "bad request");
        apply_worker_overrides(&mut result, &config);
        assert_eq!(result.reason, Some(ErrorReason::InvalidKey));
    }

    #[test]
    fn worker_fast_status_mapping_takes_priority_over_400_rule() {
        let mut fast = HashMap::new();
        fast.insert(418, ErrorReason::NoQuota);
        let config = provider_config(fast);
        let mut result = CheckResult::fail_with_status(ErrorReason::Unknown, 418, "teapot");
        apply_worker_overrides(&mut result, &config);
        assert_eq!(result.reason, Some(ErrorReason::NoQuota));
    }

    #[test]
    fn worker_override_leaves_other_statuses_alone() {
        let config = provider_config(HashMap::new());
        let mut result = CheckResult::fail_with_status(ErrorReason::ServerError, 503, "down");
        apply_worker_overrides(&mut result, &config);
        assert_eq!(result.reason, Some(ErrorReason::ServerError));
    }

    fn candidate(failing_since: Option<OffsetDateTime>) -> ProbeCandidate {
        ProbeCandidate {
            credential_id: 1,
            provider_name: "openai".to_string(),
            model_name: "gpt-4o".to_string(),
            key_value: "sk-test".to_string(),
            failing_since,
            scheduled_next_check: OffsetDateTime::now_utc() - TimeDuration::minutes(1),
        }
    }

    #[test]
    fn success_schedules_on_success_hr() {
        let policy = HealthPolicy::default();
        let now = OffsetDateTime::now_utc();
        let next = compute_next_check_time(&policy, &CheckResult::success(200, 10), None, now);
        assert_eq!(next, now + TimeDuration::hours(policy.on_success_hr as i64));
    }

    #[test]
    fn invalid_key_schedules_in_days_not_hours() {
        let policy = HealthPolicy::default();
        let now = OffsetDateTime::now_utc();
        let next = compute_next_check_time(&policy, &CheckResult::fail(ErrorReason::InvalidKey, "bad"), None, now);
        assert_eq!(next, now + TimeDuration::days(policy.on_invalid_key_days as i64));
    }

    #[test]
    fn long_failure_streak_is_quarantined() {
        let policy = HealthPolicy::default();
        let now = OffsetDateTime::now_utc();
        let failing_since = now - TimeDuration::days(policy.quarantine_after_days as i64 + 1);
        let next =
            compute_next_check_time(&policy, &CheckResult::fail(ErrorReason::ServerError, "down"), Some(failing_since), now);
        assert_eq!(next, now + TimeDuration::days(policy.quarantine_recheck_interval_days as i64));
    }

    #[test]
    fn downtime_amnesty_clears_failing_since_on_long_gap() {
        let policy = HealthPolicy::default();
        let mut cand = candidate(Some(OffsetDateTime::now_utc() - TimeDuration::days(60)));
        cand.scheduled_next_check = OffsetDateTime::now_utc() - TimeDuration::days(policy.amnesty_threshold_days as i64 + 5);
        let update = build_update(&cand, &policy, CheckResult::fail(ErrorReason::ServerError, "down"));
        // with failing_since cleared, the quarantine rules do not fire and
        // the plain server-error schedule applies instead.
        let expected_lower_bound = OffsetDateTime::now_utc() + TimeDuration::minutes(policy.on_server_error_min as i64 - 1);
        assert!(update.next_check_time > expected_lower_bound);
    }
}

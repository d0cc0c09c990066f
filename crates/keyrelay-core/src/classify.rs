use keyrelay_common::ErrorReason;
use keyrelay_config::ProviderConfig;

/// Upper bound on how much of an upstream failure body the targeted-parsing
/// stage will read; error bodies are small, this just guards against a
/// pathological upstream streaming an unbounded "error" response.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Re-runs the full three-stage classification pipeline (§4.6) against an
/// upstream failure, given the adapter's already-computed default-table
/// reason. The adapter only ever applies stage 3 (the per-family default
/// table) before the response reaches here, since it has no access to the
/// per-instance `fast_status_mapping`/`error_parsing_rules`; this function
/// fills in stages 1 and 2 on top of that.
///
/// The response body is read only when a rule is actually configured for
/// this status code (P9: at most one read), and never when stage 1 already
/// resolved the reason (P8: fast mapping never reads the body).
pub async fn reclassify_failure(config: &ProviderConfig, status: u16, response: wreq::Response) -> ErrorReason {
    if let Some(reason) = config.fast_status_mapping.get(&status) {
        return *reason;
    }

    let has_rule_for_status = config.error_parsing_rules.iter().any(|rule| rule.status_code == status);
    if !has_rule_for_status {
        return keyrelay_provider_impl::classify_buffered(config, status, &[]);
    }

    match response.bytes().await {
        Ok(bytes) => {
            let len = bytes.len().min(MAX_ERROR_BODY_BYTES);
            keyrelay_provider_impl::classify_buffered(config, status, &bytes[..len])
        }
        Err(_) => keyrelay_provider_impl::classify_buffered(config, status, &[]),
    }
}

use keyrelay_common::{ErrorReason, Status};
use time::OffsetDateTime;

/// Upper bound on a persisted `error_message`, in characters (§3: "last
/// error message (truncated)"); matches the original implementation's
/// `result.message[:1000]`.
const ERROR_MESSAGE_MAX_CHARS: usize = 1000;

fn truncate_error_message(message: Option<String>) -> Option<String> {
    message.map(|m| m.chars().take(ERROR_MESSAGE_MAX_CHARS).collect())
}

/// One row of the credential pool cache's `refresh()` query: a credential
/// known valid for a given `(instance, model_or_sentinel)` pair.
#[derive(Debug, Clone)]
pub struct PoolRow {
    pub instance: String,
    pub model: String,
    pub credential_id: i64,
    pub credential_value: String,
}

/// One row the health probe must (re-)check this cycle.
#[derive(Debug, Clone)]
pub struct ProbeCandidate {
    pub credential_id: i64,
    pub provider_name: String,
    pub model_name: String,
    pub key_value: String,
    pub failing_since: Option<OffsetDateTime>,
    /// The `next_check_time` this row was due at, used to detect a long
    /// process outage for downtime amnesty (§4.9).
    pub scheduled_next_check: OffsetDateTime,
}

/// One row the proxy probe must (re-)check this cycle.
#[derive(Debug, Clone)]
pub struct ProxyProbeCandidate {
    pub proxy_id: i64,
    pub provider_id: i64,
    pub provider_name: String,
    pub address: String,
    pub failing_since: Option<OffsetDateTime>,
}

/// The result of a single health check, ready to be durably applied.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub credential_id: i64,
    /// `None` for shared-key-status instances: the update then applies to
    /// every row keyed by `credential_id` (§4.9).
    pub model_name: Option<String>,
    pub status: Status,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub next_check_time: OffsetDateTime,
    pub ok: bool,
}

impl StatusUpdate {
    pub fn from_check(
        credential_id: i64,
        model_name: Option<String>,
        ok: bool,
        reason: Option<ErrorReason>,
        status_code: Option<u16>,
        response_time_ms: Option<u64>,
        error_message: Option<String>,
        next_check_time: OffsetDateTime,
    ) -> Self {
        let status = if ok { Status::Valid } else { reason.map(Status::from).unwrap_or(Status::Unknown) };
        Self {
            credential_id,
            model_name,
            status,
            status_code,
            response_time_ms,
            error_message: truncate_error_message(error_message),
            next_check_time,
            ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_check_truncates_long_error_messages() {
        let long_message = "x".repeat(5_000);
        let update = StatusUpdate::from_check(
            1,
            Some("gpt-4o".to_string()),
            false,
            Some(ErrorReason::ServerError),
            Some(500),
            Some(10),
            Some(long_message),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(update.error_message.unwrap().chars().count(), ERROR_MESSAGE_MAX_CHARS);
    }

    #[test]
    fn from_check_leaves_short_error_messages_untouched() {
        let update = StatusUpdate::from_check(
            1,
            None,
            false,
            Some(ErrorReason::ServerError),
            Some(500),
            Some(10),
            Some("short".to_string()),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(update.error_message.as_deref(), Some("short"));
    }
}

/// Grouped credential counts for the `/metrics` gauge family.
#[derive(Debug, Clone)]
pub struct KeyStatusCount {
    pub provider: String,
    pub model: String,
    pub status: String,
    pub count: i64,
}

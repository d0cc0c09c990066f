//! Shared types with no dependents inside this workspace: the error
//! taxonomy used by provider adapters, the credential pool, the retry
//! handler and the health probe, plus a couple of sentinels every other
//! crate needs to agree on.

use serde::{Deserialize, Serialize};

/// Model-name sentinel for providers whose credential health is shared
/// across every declared model ("shared key status").
pub const ALL_MODELS_MARKER: &str = "__ALL_MODELS__";

/// Renders `ALL_MODELS_MARKER` as `"shared"` for logs and metrics, and
/// passes any other model name through unchanged.
pub fn display_model(model: &str) -> &str {
    if model == ALL_MODELS_MARKER { "shared" } else { model }
}

/// Why a check or a proxied request failed. One definition, used by every
/// layer that needs to reason about failure severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    Unknown,
    NetworkError,
    Timeout,
    ServerError,
    ServiceUnavailable,
    Overloaded,
    BadRequest,
    InvalidKey,
    NoAccess,
    RateLimited,
    NoQuota,
    NoModel,
}

impl ErrorReason {
    /// The credential is at fault; it should be evicted from the pool and
    /// not retried within this request.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorReason::InvalidKey | ErrorReason::NoAccess | ErrorReason::NoQuota | ErrorReason::NoModel
        )
    }

    /// The upstream is at fault; a retry with the same credential is
    /// sensible after a backoff.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorReason::NetworkError
                | ErrorReason::Timeout
                | ErrorReason::ServerError
                | ErrorReason::ServiceUnavailable
                | ErrorReason::Overloaded
                | ErrorReason::RateLimited
        )
    }

    /// Caused by the client's own request; never penalize the credential,
    /// never retry.
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorReason::BadRequest | ErrorReason::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::Unknown => "unknown",
            ErrorReason::NetworkError => "network_error",
            ErrorReason::Timeout => "timeout",
            ErrorReason::ServerError => "server_error",
            ErrorReason::ServiceUnavailable => "service_unavailable",
            ErrorReason::Overloaded => "overloaded",
            ErrorReason::BadRequest => "bad_request",
            ErrorReason::InvalidKey => "invalid_key",
            ErrorReason::NoAccess => "no_access",
            ErrorReason::RateLimited => "rate_limited",
            ErrorReason::NoQuota => "no_quota",
            ErrorReason::NoModel => "no_model",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable status of a (credential, model) pair. A superset of
/// `ErrorReason` with the two non-error states a row can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Valid,
    Untested,
    Unknown,
    NetworkError,
    Timeout,
    ServerError,
    ServiceUnavailable,
    Overloaded,
    BadRequest,
    InvalidKey,
    NoAccess,
    RateLimited,
    NoQuota,
    NoModel,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Valid => "valid",
            Status::Untested => "untested",
            Status::Unknown => "unknown",
            Status::NetworkError => "network_error",
            Status::Timeout => "timeout",
            Status::ServerError => "server_error",
            Status::ServiceUnavailable => "service_unavailable",
            Status::Overloaded => "overloaded",
            Status::BadRequest => "bad_request",
            Status::InvalidKey => "invalid_key",
            Status::NoAccess => "no_access",
            Status::RateLimited => "rate_limited",
            Status::NoQuota => "no_quota",
            Status::NoModel => "no_model",
        }
    }

    /// `failing_since` is null iff the row is in one of these two states.
    pub fn is_non_failing(self) -> bool {
        matches!(self, Status::Valid | Status::Untested)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorReason> for Status {
    fn from(reason: ErrorReason) -> Self {
        match reason {
            ErrorReason::Unknown => Status::Unknown,
            ErrorReason::NetworkError => Status::NetworkError,
            ErrorReason::Timeout => Status::Timeout,
            ErrorReason::ServerError => Status::ServerError,
            ErrorReason::ServiceUnavailable => Status::ServiceUnavailable,
            ErrorReason::Overloaded => Status::Overloaded,
            ErrorReason::BadRequest => Status::BadRequest,
            ErrorReason::InvalidKey => Status::InvalidKey,
            ErrorReason::NoAccess => Status::NoAccess,
            ErrorReason::RateLimited => Status::RateLimited,
            ErrorReason::NoQuota => Status::NoQuota,
            ErrorReason::NoModel => Status::NoModel,
        }
    }
}

/// Outcome of a single probe/check call against an upstream provider.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub ok: bool,
    pub reason: Option<ErrorReason>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl CheckResult {
    pub fn success(status_code: u16, response_time_ms: u64) -> Self {
        Self {
            ok: true,
            reason: None,
            status_code: Some(status_code),
            response_time_ms: Some(response_time_ms),
            error_message: None,
        }
    }

    pub fn fail(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            status_code: None,
            response_time_ms: None,
            error_message: Some(message.into()),
        }
    }

    pub fn fail_with_status(reason: ErrorReason, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            status_code: Some(status_code),
            response_time_ms: None,
            error_message: Some(message.into()),
        }
    }

    /// The reason, defaulting to `Unknown` for an `ok` result asked about
    /// as if it had failed (never hit on the success path, but keeps call
    /// sites that always want *a* reason from needing an `Option` dance).
    pub fn reason_or_unknown(&self) -> ErrorReason {
        self.reason.unwrap_or(ErrorReason::Unknown)
    }
}

/// Cooperative shutdown signal shared by every long-lived background loop
/// (pool refresh, probe scheduler, syncers, stats flush). Built on a bare
/// `tokio::sync::Notify` rather than an external cancellation crate, per the
/// teacher's preference for primitive `tokio::sync` types (§5).
#[derive(Clone)]
pub struct ShutdownToken(std::sync::Arc<ShutdownInner>);

struct ShutdownInner {
    notify: tokio::sync::Notify,
    flag: std::sync::atomic::AtomicBool,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self(std::sync::Arc::new(ShutdownInner {
            notify: tokio::sync::Notify::new(),
            flag: std::sync::atomic::AtomicBool::new(false),
        }))
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every waiter, current and future, to stop.
    pub fn shutdown(&self) {
        self.0.flag.store(true, std::sync::atomic::Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.flag.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Resolves immediately if `shutdown` already fired, otherwise waits for it.
    pub async fn notified(&self) {
        if self.is_shutdown() {
            return;
        }
        self.0.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_retryable_client_error_are_disjoint_and_exhaustive() {
        let all = [
            ErrorReason::Unknown,
            ErrorReason::NetworkError,
            ErrorReason::Timeout,
            ErrorReason::ServerError,
            ErrorReason::ServiceUnavailable,
            ErrorReason::Overloaded,
            ErrorReason::BadRequest,
            ErrorReason::InvalidKey,
            ErrorReason::NoAccess,
            ErrorReason::RateLimited,
            ErrorReason::NoQuota,
            ErrorReason::NoModel,
        ];
        for reason in all {
            let buckets = [reason.is_fatal(), reason.is_retryable(), reason.is_client_error()];
            assert!(
                buckets.iter().filter(|b| **b).count() <= 1,
                "{reason:?} classified into more than one bucket"
            );
        }
    }

    #[test]
    fn display_model_renders_sentinel_as_shared() {
        assert_eq!(display_model(ALL_MODELS_MARKER), "shared");
        assert_eq!(display_model("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn status_non_failing_matches_invariant() {
        assert!(Status::Valid.is_non_failing());
        assert!(Status::Untested.is_non_failing());
        assert!(!Status::InvalidKey.is_non_failing());
    }

    #[tokio::test]
    async fn shutdown_token_resolves_waiters_already_parked_and_late_arrivals() {
        let token = ShutdownToken::new();
        assert!(!token.is_shutdown());

        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.notified().await;
        });
        tokio::task::yield_now().await;
        token.shutdown();
        handle.await.unwrap();

        assert!(token.is_shutdown());
        token.notified().await;
    }
}

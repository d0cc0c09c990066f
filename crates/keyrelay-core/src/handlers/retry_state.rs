use keyrelay_common::ErrorReason;

/// The pure decision half of the buffered-retryable state machine (§4.4),
/// split out from `retryable::handle` so it can be driven without a live
/// upstream. `on_key_error.attempts` bounds the number of *credentials*
/// abandoned in one request, whichever of the two reasons below forced the
/// abandonment; `on_server_error.attempts` bounds how many times a single
/// credential is retried in place before it, too, counts against that
/// budget. Both paths share one backoff sequence (`backoff_sec ·
/// backoff_factor^(attempt-1)`) since the config schema carries only one
/// such sequence, on `on_server_error`.
#[derive(Debug, Default)]
pub struct RetryState {
    pub key_err: u32,
    pub server_err: u32,
    attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryAction {
    /// Penalize the current credential (durable update + pool eviction),
    /// then acquire a fresh one excluding it and sleep before retrying.
    RotateAndSleep { sleep_secs: f64 },
    /// No penalty; sleep and retry the same credential.
    SleepSameCredential { sleep_secs: f64 },
    /// Penalize the current credential, then fail the request: the
    /// credential-rotation budget is exhausted.
    GiveUpPenalized,
    /// Fail the request immediately without touching the credential: the
    /// reason is client-caused or unclassified, per §4.4's terminal branch.
    GiveUpUnpenalized,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn backoff(&mut self, base: f64, factor: f64) -> f64 {
        self.attempt += 1;
        base * factor.powi(self.attempt as i32 - 1)
    }

    /// Advances the state machine by one observed failure, returning what
    /// the caller should do next. `key_limit`/`server_limit` are
    /// `on_key_error.attempts`/`on_server_error.attempts`; `backoff_base`/
    /// `backoff_factor` are `on_server_error.backoff_sec`/`backoff_factor`.
    pub fn on_failure(
        &mut self,
        reason: ErrorReason,
        key_limit: u32,
        server_limit: u32,
        backoff_base: f64,
        backoff_factor: f64,
    ) -> RetryAction {
        if reason.is_fatal() {
            return self.rotate(key_limit, backoff_base, backoff_factor);
        }
        if reason.is_retryable() {
            self.server_err += 1;
            if self.server_err >= server_limit {
                return self.rotate(key_limit, backoff_base, backoff_factor);
            }
            let sleep_secs = self.backoff(backoff_base, backoff_factor);
            return RetryAction::SleepSameCredential { sleep_secs };
        }
        RetryAction::GiveUpUnpenalized
    }

    fn rotate(&mut self, key_limit: u32, backoff_base: f64, backoff_factor: f64) -> RetryAction {
        self.key_err += 1;
        self.server_err = 0;
        if self.key_err >= key_limit {
            return RetryAction::GiveUpPenalized;
        }
        let sleep_secs = self.backoff(backoff_base, backoff_factor);
        RetryAction::RotateAndSleep { sleep_secs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_retry_then_rotation_s1() {
        // on_server_error.attempts=2, on_key_error.attempts=2; 500, 500 on
        // one credential rotates to the next rather than failing outright.
        let mut state = RetryState::new();
        let a1 = state.on_failure(ErrorReason::ServerError, 2, 2, 1.0, 2.0);
        assert_eq!(a1, RetryAction::SleepSameCredential { sleep_secs: 1.0 });
        let a2 = state.on_failure(ErrorReason::ServerError, 2, 2, 1.0, 2.0);
        assert_eq!(a2, RetryAction::RotateAndSleep { sleep_secs: 2.0 });
        assert_eq!(state.key_err, 1);
        assert_eq!(state.server_err, 0);
    }

    #[test]
    fn key_storm_backoff_s3() {
        // on_key_error.attempts=3, backoff_sec=10, backoff_factor=2; three
        // consecutive fatal classifications sleep 10s then 20s and give up
        // penalized on the third.
        let mut state = RetryState::new();
        let a1 = state.on_failure(ErrorReason::InvalidKey, 3, 5, 10.0, 2.0);
        assert_eq!(a1, RetryAction::RotateAndSleep { sleep_secs: 10.0 });
        let a2 = state.on_failure(ErrorReason::InvalidKey, 3, 5, 10.0, 2.0);
        assert_eq!(a2, RetryAction::RotateAndSleep { sleep_secs: 20.0 });
        let a3 = state.on_failure(ErrorReason::InvalidKey, 3, 5, 10.0, 2.0);
        assert_eq!(a3, RetryAction::GiveUpPenalized);
        assert_eq!(state.key_err, 3);
    }

    #[test]
    fn unsafe_status_mapped_fatal_rotates_once_s2() {
        let mut state = RetryState::new();
        let action = state.on_failure(ErrorReason::InvalidKey, 2, 2, 1.0, 2.0);
        assert_eq!(action, RetryAction::RotateAndSleep { sleep_secs: 1.0 });
        assert_eq!(state.key_err, 1);
    }

    #[test]
    fn terminal_reason_gives_up_without_penalty() {
        let mut state = RetryState::new();
        let action = state.on_failure(ErrorReason::BadRequest, 2, 2, 1.0, 2.0);
        assert_eq!(action, RetryAction::GiveUpUnpenalized);
        assert_eq!(state.key_err, 0);
        assert_eq!(state.server_err, 0);

        let action = state.on_failure(ErrorReason::Unknown, 2, 2, 1.0, 2.0);
        assert_eq!(action, RetryAction::GiveUpUnpenalized);
    }

    #[test]
    fn fresh_key_gets_a_fresh_server_budget() {
        // A fatal classification resets server_err so an unrelated earlier
        // run of server errors on a previous credential cannot combine with
        // a new credential's server errors to exhaust the budget early.
        let mut state = RetryState::new();
        state.on_failure(ErrorReason::ServerError, 5, 2, 1.0, 2.0);
        assert_eq!(state.server_err, 1);
        state.on_failure(ErrorReason::InvalidKey, 5, 2, 1.0, 2.0);
        assert_eq!(state.server_err, 0);
    }
}

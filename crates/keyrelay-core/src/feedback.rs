use std::sync::Arc;

use keyrelay_common::{ErrorReason, ALL_MODELS_MARKER};

use crate::state::{AppState, ProviderRuntime};

/// Schedules the two fire-and-forget failure-feedback tasks of §4.2 step 5 /
/// §4.4: evict the credential from the pool, and report the failure to the
/// durable store with a near-future placeholder next-check time. Both are
/// spawned before the dispatcher returns its error response; neither may
/// affect it (§7).
pub fn spawn_failure_feedback(
    state: Arc<AppState>,
    runtime: Arc<ProviderRuntime>,
    credential_id: i64,
    model: Option<String>,
    reason: ErrorReason,
) {
    let pool_model = model.clone().unwrap_or_else(|| ALL_MODELS_MARKER.to_string());

    let evict_state = state.clone();
    let evict_instance = runtime.name.clone();
    let evict_model = pool_model.clone();
    tokio::spawn(async move {
        evict_state.pool.evict(&evict_instance, &evict_model, credential_id).await;
    });

    tokio::spawn(async move {
        let model_name = if runtime.config.shared_key_status { None } else { model.as_deref() };
        if let Err(err) = state.storage.report_request_failure(credential_id, model_name, reason).await {
            tracing::warn!(error = %err, credential_id, reason = %reason, "request-path failure feedback failed");
        }
    });
}

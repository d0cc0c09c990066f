use std::collections::HashSet;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::StatusCode;
use axum::response::Response;
use keyrelay_common::ALL_MODELS_MARKER;
use keyrelay_provider_core::adapter::ProxyContent;

use crate::error::GatewayError;
use crate::feedback::spawn_failure_feedback;
use crate::handlers::retry_state::{RetryAction, RetryState};
use crate::handlers::{build_upstream_headers, to_adapter_method, RequestCtx};
use crate::response::build_streaming_response;
use crate::stream_monitor::{monitor_stream, AccessLogContext};

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Buffered dispatch with in-process retry (§4.4): multi-model non-debug
/// instances. Retries rotate credentials on a fatal reason and hold the same
/// credential with backoff on a retryable one; a terminal reason fails the
/// request immediately.
pub async fn handle(ctx: RequestCtx, body: Body) -> Result<Response, GatewayError> {
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| GatewayError::new(StatusCode::BAD_REQUEST, "request body too large or unreadable"))?;

    let config = &ctx.runtime.config;
    let model =
        ctx.runtime.adapter.parse_request_details(&ctx.path, &bytes).map_err(|_| GatewayError::model_undetermined())?;
    if !config.models.contains_key(&model) {
        return Err(GatewayError::model_not_permitted());
    }

    let pool_model = if config.shared_key_status { ALL_MODELS_MARKER.to_string() } else { model.clone() };
    let client =
        ctx.state.clients.get_client_for(config.proxy.static_url.as_deref()).map_err(|_| GatewayError::upstream_unavailable())?;
    let headers = build_upstream_headers(&ctx.headers);
    let adapter_method = to_adapter_method(&ctx.method)?;

    let key_limit = config.retry_policy.on_key_error.attempts;
    let server_limit = config.retry_policy.on_server_error.attempts;
    let backoff_base = config.retry_policy.on_server_error.backoff_sec;
    let backoff_factor = config.retry_policy.on_server_error.backoff_factor;

    let mut tried_ids: HashSet<i64> = HashSet::new();
    let mut retry_state = RetryState::new();

    let mut entry =
        ctx.state.pool.acquire(&ctx.runtime.name, &pool_model, &tried_ids).await.ok_or_else(GatewayError::pool_exhausted)?;

    loop {
        let outcome = ctx
            .runtime
            .adapter
            .proxy_request(
                &client,
                &config.api_base_url,
                &entry.token,
                adapter_method,
                headers.clone(),
                &ctx.path,
                ctx.query.as_deref(),
                ProxyContent::Buffered(bytes.clone()),
            )
            .await
            .map_err(|_| GatewayError::upstream_unavailable())?;

        if outcome.check.ok {
            let status = StatusCode::from_u16(outcome.response.status().as_u16()).unwrap_or(StatusCode::OK);
            let response_headers = outcome.response.headers().clone();
            let reason_phrase = outcome.response.status().canonical_reason().unwrap_or("").to_string();
            let byte_stream = outcome.response.bytes_stream();

            let log_ctx = AccessLogContext {
                ip: ctx.peer_ip,
                method: ctx.method.to_string(),
                path: ctx.path.clone(),
                instance: ctx.runtime.name.clone(),
                model: pool_model,
                upstream_status: status.as_u16(),
                upstream_reason_phrase: reason_phrase,
            };
            let body = monitor_stream(byte_stream, log_ctx, ctx.state.stats.clone());
            return Ok(build_streaming_response(status, &response_headers, body));
        }

        let status = outcome.response.status().as_u16();
        let reason = crate::classify::reclassify_failure(config, status, outcome.response).await;

        match retry_state.on_failure(reason, key_limit, server_limit, backoff_base, backoff_factor) {
            RetryAction::RotateAndSleep { sleep_secs } => {
                spawn_failure_feedback(
                    ctx.state.clone(),
                    ctx.runtime.clone(),
                    entry.credential_id,
                    Some(pool_model.clone()),
                    reason,
                );
                tried_ids.insert(entry.credential_id);
                tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
                entry = ctx
                    .state
                    .pool
                    .acquire(&ctx.runtime.name, &pool_model, &tried_ids)
                    .await
                    .ok_or_else(GatewayError::pool_exhausted)?;
            }
            RetryAction::SleepSameCredential { sleep_secs } => {
                tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
            }
            RetryAction::GiveUpPenalized => {
                spawn_failure_feedback(
                    ctx.state.clone(),
                    ctx.runtime.clone(),
                    entry.credential_id,
                    Some(pool_model.clone()),
                    reason,
                );
                return Err(GatewayError::upstream_unavailable());
            }
            RetryAction::GiveUpUnpenalized => {
                // Client-caused or otherwise unclassified: fail immediately,
                // no penalty and no retry (§4.4's terminal branch).
                return Err(GatewayError::upstream_unavailable());
            }
        }
    }
}

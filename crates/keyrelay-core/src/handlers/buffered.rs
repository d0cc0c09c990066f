use std::collections::HashSet;

use axum::body::{to_bytes, Body};
use axum::http::StatusCode;
use axum::response::Response;
use keyrelay_common::ALL_MODELS_MARKER;
use keyrelay_provider_core::adapter::ProxyContent;

use crate::error::GatewayError;
use crate::feedback::spawn_failure_feedback;
use crate::handlers::{build_upstream_headers, to_adapter_method, RequestCtx};
use crate::response::build_streaming_response;
use crate::stream_monitor::{monitor_stream, AccessLogContext};

/// Upper bound on a buffered request body; large enough for any realistic
/// chat/completions payload, small enough to bound worst-case memory.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Buffers the full request body before dispatching (§4.3): debug mode, or
/// multi-model OpenAI-family instances whose model lives in the JSON body.
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
    let entry = ctx
        .state
        .pool
        .acquire(&ctx.runtime.name, &pool_model, &HashSet::new())
        .await
        .ok_or_else(GatewayError::pool_exhausted)?;

    let client =
        ctx.state.clients.get_client_for(config.proxy.static_url.as_deref()).map_err(|_| GatewayError::upstream_unavailable())?;

    let headers = build_upstream_headers(&ctx.headers);
    let adapter_method = to_adapter_method(&ctx.method)?;

    let outcome = ctx
        .runtime
        .adapter
        .proxy_request(
            &client,
            &config.api_base_url,
            &entry.token,
            adapter_method,
            headers,
            &ctx.path,
            ctx.query.as_deref(),
            ProxyContent::Buffered(bytes),
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
        Ok(build_streaming_response(status, &response_headers, body))
    } else {
        let status = outcome.response.status().as_u16();
        let reason = crate::classify::reclassify_failure(config, status, outcome.response).await;
        spawn_failure_feedback(ctx.state.clone(), ctx.runtime.clone(), entry.credential_id, Some(pool_model), reason);
        Err(GatewayError::upstream_unavailable())
    }
}

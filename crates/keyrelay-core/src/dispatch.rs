use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use keyrelay_config::HandlerMode;

use crate::auth::resolve_instance;
use crate::error::GatewayError;
use crate::handlers::{buffered, full_stream, retryable, RequestCtx};
use crate::state::AppState;

/// Builds the gateway's router: a single catch-all route, since the
/// instance is resolved from the gateway token rather than the path (§4.1).
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/{*path}", any(gateway_handler)).with_state(state)
}

async fn gateway_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Body,
) -> Response {
    match dispatch(state, peer, method, headers, uri, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn dispatch(
    state: Arc<AppState>,
    peer: SocketAddr,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Body,
) -> Result<Response, GatewayError> {
    let instance = resolve_instance(&state.tokens, &headers)?.to_string();
    let runtime = state.provider(&instance).cloned().ok_or_else(GatewayError::provider_config_missing)?;

    let ctx = RequestCtx {
        state: state.clone(),
        runtime: runtime.clone(),
        peer_ip: peer.ip(),
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
    };

    match runtime.handler_mode {
        HandlerMode::FullStream => full_stream::handle(ctx, body).await,
        HandlerMode::Buffered => buffered::handle(ctx, body).await,
        HandlerMode::BufferedRetryable => retryable::handle(ctx, body).await,
    }
}

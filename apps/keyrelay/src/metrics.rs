use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use keyrelay_common::{display_model, ShutdownToken};
use keyrelay_config::MetricsConfig;
use keyrelay_storage::{KeyStatusCount, Storage};
use tokio::task::JoinHandle;

const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Cached `/metrics` snapshot, refreshed by its own background loop so the
/// exposition endpoint never issues a DB query synchronously (§6).
pub struct MetricsCache {
    rows: Mutex<Vec<KeyStatusCount>>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self { rows: Mutex::new(Vec::new()) }
    }

    fn snapshot(&self) -> Vec<KeyStatusCount> {
        self.rows.lock().expect("metrics cache poisoned").clone()
    }

    fn replace(&self, rows: Vec<KeyStatusCount>) {
        *self.rows.lock().expect("metrics cache poisoned") = rows;
    }
}

/// Spawns the periodic snapshot refresh loop.
pub fn spawn_refresh_loop(cache: Arc<MetricsCache>, storage: Arc<dyn Storage>, shutdown: ShutdownToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(REFRESH_INTERVAL) => {
                    match storage.key_status_counts().await {
                        Ok(rows) => cache.replace(rows),
                        Err(err) => tracing::warn!(error = %err, "failed to refresh /metrics snapshot"),
                    }
                }
            }
        }
    })
}

#[derive(Clone)]
struct MetricsState {
    cache: Arc<MetricsCache>,
    config: MetricsConfig,
}

/// Builds the `/metrics` router (§6).
pub fn router(cache: Arc<MetricsCache>, config: MetricsConfig) -> Router {
    Router::new().route("/metrics", get(handler)).with_state(MetricsState { cache, config })
}

async fn handler(State(state): State<MetricsState>, headers: HeaderMap) -> Response {
    if !state.config.enabled {
        return (
            StatusCode::NOT_FOUND,
            [("content-type", "application/json")],
            serde_json::json!({ "detail": "Metrics endpoint is not enabled" }).to_string(),
        )
            .into_response();
    }

    let Some(expected) = &state.config.access_token else {
        return render(&state.cache);
    };

    match extract_bearer(&headers) {
        None => StatusCode::UNAUTHORIZED.into_response(),
        Some(token) if token == expected => render(&state.cache),
        Some(_) => StatusCode::FORBIDDEN.into_response(),
    }
}

fn render(cache: &MetricsCache) -> Response {
    let mut body = String::from(
        "# HELP llm_gateway_keys_total Credential count by provider, model and status.\n\
         # TYPE llm_gateway_keys_total gauge\n",
    );
    for row in cache.snapshot() {
        let model = display_model(&row.model);
        let _ = writeln!(
            body,
            "llm_gateway_keys_total{{provider=\"{}\",model=\"{}\",status=\"{}\"}} {}",
            row.provider, model, row.status, row.count
        );
    }
    ([("content-type", "text/plain; version=0.0.4")], body).into_response()
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use keyrelay_common::ALL_MODELS_MARKER;

    #[test]
    fn extract_bearer_requires_the_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert_eq!(extract_bearer(&headers), Some("secret"));

        let mut wrong_scheme = HeaderMap::new();
        wrong_scheme.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Basic secret"));
        assert_eq!(extract_bearer(&wrong_scheme), None);

        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn render_uses_the_gauge_name_and_shared_sentinel() {
        let cache = MetricsCache::new();
        cache.replace(vec![
            KeyStatusCount { provider: "openai".into(), model: ALL_MODELS_MARKER.into(), status: "valid".into(), count: 3 },
            KeyStatusCount { provider: "openai".into(), model: "gpt-4".into(), status: "quarantined".into(), count: 1 },
        ]);

        let response = render(&cache);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(body.contains("# TYPE llm_gateway_keys_total gauge"));
        assert!(body.contains(r#"llm_gateway_keys_total{provider="openai",model="shared",status="valid"} 3"#));
        assert!(body.contains(r#"llm_gateway_keys_total{provider="openai",model="gpt-4",status="quarantined"} 1"#));
    }

    #[tokio::test]
    async fn disabled_endpoint_returns_404_with_json_detail() {
        let state =
            MetricsState { cache: Arc::new(MetricsCache::new()), config: MetricsConfig { enabled: false, access_token: None } };

        let response = handler(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), br#"{"detail":"Metrics endpoint is not enabled"}"#);
    }

    #[tokio::test]
    async fn missing_token_is_401_and_wrong_token_is_403() {
        let state = MetricsState {
            cache: Arc::new(MetricsCache::new()),
            config: MetricsConfig { enabled: true, access_token: Some("right".into()) },
        };

        let missing = handler(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let mut wrong_headers = HeaderMap::new();
        wrong_headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        let wrong = handler(State(state), wrong_headers).await;
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
    }
}

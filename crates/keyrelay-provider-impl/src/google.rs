use std::time::Instant;

use async_trait::async_trait;
use keyrelay_common::{CheckResult, ErrorReason};
use keyrelay_config::ProviderConfig;
use keyrelay_provider_core::adapter::{Method, ModelUndeterminedError, ProxyContent, ProxyOutcome};
use keyrelay_provider_core::classify::{classify, google_default_table};
use keyrelay_provider_core::headers::{header_set, Headers};
use keyrelay_provider_core::ProviderAdapter;

pub struct GoogleAdapter;

impl GoogleAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoogleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn parse_request_details(&self, path: &str, _body: &[u8]) -> Result<String, ModelUndeterminedError> {
        path.split('/')
            .position(|segment| segment == "models")
            .and_then(|idx| path.split('/').nth(idx + 1))
            .map(|segment| segment.split(':').next().unwrap_or(segment).to_string())
            .filter(|model| !model.is_empty())
            .ok_or(ModelUndeterminedError)
    }

    fn build_headers(&self, token: &str, headers: &mut Headers) {
        header_set(headers, "x-goog-api-key", token);
        header_set(headers, "Content-Type", "application/json");
    }

    async fn check(
        &self,
        client: &wreq::Client,
        base_url: &str,
        token: &str,
        probe_path: &str,
        probe_payload: &serde_json::Value,
    ) -> CheckResult {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), probe_path.trim_start_matches('/'));
        let started = Instant::now();
        let result = client
            .post(&url)
            .header("x-goog-api-key", token)
            .header("Content-Type", "application/json")
            .json(probe_payload)
            .send()
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(resp) if resp.status().is_success() => CheckResult::success(resp.status().as_u16(), elapsed_ms),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let reason = google_default_table(status);
                let body = resp.text().await.unwrap_or_default();
                CheckResult::fail_with_status(reason, status, body)
            }
            Err(err) => CheckResult::fail(network_error_reason(&err), err.to_string()),
        }
    }

    async fn proxy_request(
        &self,
        client: &wreq::Client,
        base_url: &str,
        token: &str,
        method: Method,
        mut headers: Headers,
        path: &str,
        query: Option<&str>,
        content: ProxyContent,
    ) -> Result<ProxyOutcome, wreq::Error> {
        self.build_headers(token, &mut headers);
        send_request(client, base_url, method, headers, path, query, content, google_default_table).await
    }
}

pub(crate) fn network_error_reason(err: &wreq::Error) -> ErrorReason {
    if err.is_timeout() {
        ErrorReason::Timeout
    } else {
        ErrorReason::NetworkError
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn send_request(
    client: &wreq::Client,
    base_url: &str,
    method: Method,
    headers: Headers,
    path: &str,
    query: Option<&str>,
    content: ProxyContent,
    default_table: fn(u16) -> ErrorReason,
) -> Result<ProxyOutcome, wreq::Error> {
    let mut url = format!("{}{}", base_url.trim_end_matches('/'), path);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(q);
    }

    let mut builder = match method {
        Method::Get => client.get(&url),
        Method::Post => client.post(&url),
        Method::Put => client.put(&url),
        Method::Delete => client.delete(&url),
        Method::Patch => client.patch(&url),
    };
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }
    builder = match content {
        ProxyContent::Buffered(bytes) => builder.body(bytes),
        ProxyContent::Stream(body) => builder.body(body),
    };

    let started = Instant::now();
    let response = builder.send().await?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let status = response.status();

    let check = if status.is_success() {
        CheckResult::success(status.as_u16(), elapsed_ms)
    } else {
        // Upstream failures are classified from the status code alone here;
        // the body-reading, targeted-parsing stage runs at the call site,
        // which can choose to buffer the body before deciding.
        CheckResult::fail_with_status(default_table(status.as_u16()), status.as_u16(), String::new())
    };

    Ok(ProxyOutcome { response, check })
}

/// Runs the full three-stage classification against a response whose body
/// has been fully buffered by the caller (buffered/retryable handlers).
pub fn classify_buffered(config: &ProviderConfig, status: u16, body: &[u8]) -> ErrorReason {
    classify(
        status,
        &config.fast_status_mapping,
        !config.error_parsing_rules.is_empty(),
        &config.error_parsing_rules,
        Some(body),
        google_default_table,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_from_path_segment_after_models() {
        let adapter = GoogleAdapter::new();
        let model = adapter.parse_request_details("/v1beta/models/gemini-1.5-pro:generateContent", &[]).unwrap();
        assert_eq!(model, "gemini-1.5-pro");
    }

    #[test]
    fn parses_model_without_trailing_action() {
        let adapter = GoogleAdapter::new();
        let model = adapter.parse_request_details("/v1beta/models/gemini-1.5-flash", &[]).unwrap();
        assert_eq!(model, "gemini-1.5-flash");
    }

    #[test]
    fn missing_models_segment_is_undetermined() {
        let adapter = GoogleAdapter::new();
        assert!(adapter.parse_request_details("/v1beta/tunedModels", &[]).is_err());
    }

    #[test]
    fn empty_model_segment_is_undetermined() {
        let adapter = GoogleAdapter::new();
        assert!(adapter.parse_request_details("/v1beta/models/", &[]).is_err());
    }

    #[test]
    fn build_headers_sets_goog_api_key() {
        let adapter = GoogleAdapter::new();
        let mut headers: Headers = Vec::new();
        adapter.build_headers("secret-token", &mut headers);
        assert_eq!(keyrelay_provider_core::headers::header_get(&headers, "x-goog-api-key"), Some("secret-token"));
    }
}

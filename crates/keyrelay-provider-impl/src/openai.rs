use std::time::Instant;

use async_trait::async_trait;
use keyrelay_common::{CheckResult, ErrorReason};
use keyrelay_config::ProviderConfig;
use keyrelay_provider_core::adapter::{Method, ModelUndeterminedError, ProxyContent, ProxyOutcome};
use keyrelay_provider_core::classify::{classify, openai_default_table};
use keyrelay_provider_core::headers::{header_set, Headers};
use keyrelay_provider_core::ProviderAdapter;

use crate::google::{network_error_reason, send_request};

pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn parse_request_details(&self, _path: &str, body: &[u8]) -> Result<String, ModelUndeterminedError> {
        let json: serde_json::Value = serde_json::from_slice(body).map_err(|_| ModelUndeterminedError)?;
        json.get("model")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .filter(|model| !model.is_empty())
            .ok_or(ModelUndeterminedError)
    }

    fn build_headers(&self, token: &str, headers: &mut Headers) {
        header_set(headers, "Authorization", format!("Bearer {token}"));
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
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .json(probe_payload)
            .send()
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(resp) if resp.status().is_success() => CheckResult::success(resp.status().as_u16(), elapsed_ms),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let reason = openai_default_table(status);
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
        send_request(client, base_url, method, headers, path, query, content, openai_default_table).await
    }
}

/// Runs the full three-stage classification against a fully buffered body.
pub fn classify_buffered(config: &ProviderConfig, status: u16, body: &[u8]) -> ErrorReason {
    classify(
        status,
        &config.fast_status_mapping,
        !config.error_parsing_rules.is_empty(),
        &config.error_parsing_rules,
        Some(body),
        openai_default_table,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_from_json_body() {
        let adapter = OpenAiAdapter::new();
        let body = br#"{"model":"gpt-4o","messages":[]}"#;
        let model = adapter.parse_request_details("/v1/chat/completions", body).unwrap();
        assert_eq!(model, "gpt-4o");
    }

    #[test]
    fn missing_model_field_is_undetermined() {
        let adapter = OpenAiAdapter::new();
        let body = br#"{"messages":[]}"#;
        assert!(adapter.parse_request_details("/v1/chat/completions", body).is_err());
    }

    #[test]
    fn unparseable_body_is_undetermined() {
        let adapter = OpenAiAdapter::new();
        assert!(adapter.parse_request_details("/v1/chat/completions", b"not json").is_err());
    }

    #[test]
    fn build_headers_sets_bearer_token() {
        let adapter = OpenAiAdapter::new();
        let mut headers: Headers = Vec::new();
        adapter.build_headers("sk-test", &mut headers);
        assert_eq!(
            keyrelay_provider_core::headers::header_get(&headers, "Authorization"),
            Some("Bearer sk-test")
        );
    }
}

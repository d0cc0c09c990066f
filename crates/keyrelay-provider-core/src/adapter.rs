use async_trait::async_trait;
use bytes::Bytes;
use keyrelay_common::CheckResult;

use crate::headers::Headers;

/// The inbound HTTP method a request is proxied under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

/// Request body as seen by `proxy_request`: either fully buffered, or a
/// stream of chunks forwarded as they arrive.
pub enum ProxyContent {
    Buffered(Bytes),
    Stream(wreq::Body),
}

/// Could not determine which model a request targets (§4.6).
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot determine model from request")]
pub struct ModelUndeterminedError;

/// The upstream response returned by `proxy_request`, paired with the
/// classification of whether it succeeded.
pub struct ProxyOutcome {
    pub response: wreq::Response,
    pub check: CheckResult,
}

/// A provider family's capability set (§4.6). One implementation per
/// family (Google, OpenAI), parameterized by `ProviderConfig` at the call
/// site rather than per-instance state, since nothing here is instance-
/// specific beyond the config and credential passed in.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Extracts the target model from the inbound path/body. Google-family
    /// adapters read the `/models/<name>` path segment; OpenAI-family
    /// adapters read a `model` field from the JSON body.
    fn parse_request_details(&self, path: &str, body: &[u8]) -> Result<String, ModelUndeterminedError>;

    /// Produces the upstream auth header(s) for `token`, after the caller
    /// has already stripped the inbound headers listed in
    /// `headers::STRIPPED_INBOUND_HEADERS`.
    fn build_headers(&self, token: &str, headers: &mut Headers);

    /// A lightweight probe request against `probe_path` (the model's
    /// configured endpoint suffix, already resolved relative to the
    /// model), sending `probe_payload` as the JSON body.
    async fn check(
        &self,
        client: &wreq::Client,
        base_url: &str,
        token: &str,
        probe_path: &str,
        probe_payload: &serde_json::Value,
    ) -> CheckResult;

    /// Performs the actual upstream call and classifies the result.
    #[allow(clippy::too_many_arguments)]
    async fn proxy_request(
        &self,
        client: &wreq::Client,
        base_url: &str,
        token: &str,
        method: Method,
        headers: Headers,
        path: &str,
        query: Option<&str>,
        content: ProxyContent,
    ) -> Result<ProxyOutcome, wreq::Error>;
}

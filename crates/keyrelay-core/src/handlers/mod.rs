pub mod buffered;
pub mod full_stream;
mod retry_state;
pub mod retryable;

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use keyrelay_provider_core::adapter::Method as AdapterMethod;
use keyrelay_provider_core::headers::{strip_inbound, Headers};

use crate::error::GatewayError;
use crate::state::{AppState, ProviderRuntime};

/// Everything a handler needs about one inbound request, resolved by the
/// dispatcher before the handler-mode branch (§4.1).
pub struct RequestCtx {
    pub state: Arc<AppState>,
    pub runtime: Arc<ProviderRuntime>,
    pub peer_ip: IpAddr,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

pub(crate) fn to_adapter_method(method: &Method) -> Result<AdapterMethod, GatewayError> {
    match *method {
        Method::GET => Ok(AdapterMethod::Get),
        Method::POST => Ok(AdapterMethod::Post),
        Method::PUT => Ok(AdapterMethod::Put),
        Method::DELETE => Ok(AdapterMethod::Delete),
        Method::PATCH => Ok(AdapterMethod::Patch),
        _ => Err(GatewayError::new(StatusCode::METHOD_NOT_ALLOWED, "method not supported")),
    }
}

/// Converts the inbound header map into the adapter's `Headers` shape and
/// strips what an adapter must not forward upstream (§4.6).
pub(crate) fn build_upstream_headers(headers: &HeaderMap) -> Headers {
    let mut out: Headers = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();
    strip_inbound(&mut out);
    out
}

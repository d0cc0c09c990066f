use std::collections::HashMap;

use axum::http::HeaderMap;
use keyrelay_config::Config;

use crate::error::GatewayError;

/// Gateway token → instance name, built once at bootstrap from enabled
/// instances (§4.1 steps 1-2). Tokens are unique across enabled instances,
/// enforced by the config loader's validation pass.
pub type TokenMap = HashMap<String, String>;

pub fn build_token_map(config: &Config) -> TokenMap {
    config.enabled_providers().map(|p| (p.gateway_token.clone(), p.name.clone())).collect()
}

/// Extracts the gateway token: `Authorization: Bearer <t>` preferred, then
/// `x-goog-api-key: <t>` (§4.1 step 1).
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Some(token) = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")) {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    headers
        .get("x-goog-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extracts the token and resolves it to an instance name (§4.1 steps 1-2).
pub fn resolve_instance<'a>(tokens: &'a TokenMap, headers: &HeaderMap) -> Result<&'a str, GatewayError> {
    let token = extract_token(headers).ok_or_else(GatewayError::missing_token)?;
    tokens.get(&token).map(String::as_str).ok_or_else(GatewayError::unknown_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_bearer_over_goog_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("x-goog-api-key", HeaderValue::from_static("xyz"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn falls_back_to_goog_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_static("xyz"));
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn missing_both_headers_is_none() {
        assert_eq!(extract_token(&HeaderMap::new()), None);
    }
}

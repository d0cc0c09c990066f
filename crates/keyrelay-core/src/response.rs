use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

/// Hop-by-hop and length/encoding headers stripped from the upstream
/// response before forwarding it downstream (§6).
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-encoding",
];

/// Builds the downstream streaming response from the upstream's status,
/// headers and monitored body. Headers are rebuilt byte-for-byte rather than
/// reused directly, since the upstream header map belongs to the HTTP
/// client's own `http` crate version.
pub fn build_streaming_response(status: StatusCode, upstream_headers: &wreq::header::HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;

    for (name, value) in upstream_headers.iter() {
        if STRIPPED_RESPONSE_HEADERS.iter().any(|stripped| name.as_str().eq_ignore_ascii_case(stripped)) {
            continue;
        }
        let (Ok(header_name), Ok(header_value)) =
            (HeaderName::from_bytes(name.as_str().as_bytes()), HeaderValue::from_bytes(value.as_bytes()))
        else {
            continue;
        };
        response.headers_mut().append(header_name, header_value);
    }

    response
}

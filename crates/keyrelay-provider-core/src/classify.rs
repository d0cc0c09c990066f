use keyrelay_common::ErrorReason;
use keyrelay_config::ErrorParsingRule;

/// The three-stage classification pipeline of §4.6, applied to an upstream
/// failure response. `body` is read at most once, only if stage 1 misses
/// and targeted parsing is enabled.
pub fn classify(
    status: u16,
    fast_status_mapping: &std::collections::HashMap<u16, ErrorReason>,
    error_parsing_enabled: bool,
    rules: &[ErrorParsingRule],
    body: Option<&[u8]>,
    default_table: fn(u16) -> ErrorReason,
) -> ErrorReason {
    if let Some(reason) = fast_status_mapping.get(&status) {
        return *reason;
    }

    if error_parsing_enabled
        && let Some(body) = body
        && let Some(reason) = targeted_parse(status, rules, body)
    {
        return reason;
    }

    default_table(status)
}

fn targeted_parse(status: u16, rules: &[ErrorParsingRule], body: &[u8]) -> Option<ErrorReason> {
    let json: serde_json::Value = serde_json::from_slice(body).ok()?;

    let mut candidates: Vec<&ErrorParsingRule> =
        rules.iter().filter(|rule| rule.status_code == status).collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    for rule in candidates {
        let Some(field) = json.pointer(&json_pointer(&rule.error_path)) else { continue };
        let text = match field {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if rule.regex.is_match(&text) {
            return Some(rule.map_to);
        }
    }
    None
}

/// `error_path` in configuration is a dotted path (`"error.message"`); JSON
/// Pointer syntax needs a leading slash and `/`-separated segments.
fn json_pointer(dotted: &str) -> String {
    if dotted.is_empty() {
        return String::new();
    }
    format!("/{}", dotted.replace('.', "/"))
}

/// Google family default status-code mapping (§4.6, stage 3).
pub fn google_default_table(status: u16) -> ErrorReason {
    match status {
        400 => ErrorReason::BadRequest,
        403 => ErrorReason::NoAccess,
        404 => ErrorReason::NoModel,
        429 => ErrorReason::NoQuota,
        500 => ErrorReason::ServerError,
        503 => ErrorReason::Overloaded,
        504 => ErrorReason::Timeout,
        _ => ErrorReason::Unknown,
    }
}

/// OpenAI family default status-code mapping (§4.6, stage 3).
pub fn openai_default_table(status: u16) -> ErrorReason {
    match status {
        401 | 403 => ErrorReason::InvalidKey,
        429 => ErrorReason::RateLimited,
        500..=599 => ErrorReason::ServerError,
        _ => ErrorReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_mapping_wins_without_reading_body() {
        let mut fast = std::collections::HashMap::new();
        fast.insert(418, ErrorReason::NoQuota);
        let reason = classify(418, &fast, true, &[], None, google_default_table);
        assert_eq!(reason, ErrorReason::NoQuota);
    }

    #[test]
    fn default_table_is_the_fallback() {
        let fast = std::collections::HashMap::new();
        let reason = classify(503, &fast, false, &[], None, google_default_table);
        assert_eq!(reason, ErrorReason::Overloaded);
    }

    #[test]
    fn json_pointer_translates_dotted_path() {
        assert_eq!(json_pointer("error.message"), "/error/message");
        assert_eq!(json_pointer(""), "");
    }

    fn rule(status_code: u16, error_path: &str, regex: &str, map_to: ErrorReason, priority: i32) -> ErrorParsingRule {
        ErrorParsingRule {
            status_code,
            error_path: error_path.to_string(),
            regex: regex::Regex::new(regex).unwrap(),
            map_to,
            priority,
            description: String::new(),
        }
    }

    #[test]
    fn targeted_parsing_evaluates_in_descending_priority() {
        let rules = vec![
            rule(400, "error.type", ".*", ErrorReason::BadRequest, 1),
            rule(400, "error.type", "Arrearage", ErrorReason::InvalidKey, 10),
        ];
        let body = br#"{"error":{"type":"Arrearage"}}"#;
        let reason = classify(400, &std::collections::HashMap::new(), true, &rules, Some(body), google_default_table);
        assert_eq!(reason, ErrorReason::InvalidKey);
    }

    #[test]
    fn targeted_parsing_breaks_ties_by_declaration_order() {
        let rules = vec![
            rule(400, "error.type", "Arrearage", ErrorReason::InvalidKey, 5),
            rule(400, "error.type", "Arrearage", ErrorReason::NoQuota, 5),
        ];
        let body = br#"{"error":{"type":"Arrearage"}}"#;
        let reason = classify(400, &std::collections::HashMap::new(), true, &rules, Some(body), google_default_table);
        assert_eq!(reason, ErrorReason::InvalidKey);
    }

    #[test]
    fn targeted_parsing_falls_through_to_default_table_when_no_rule_matches() {
        let rules = vec![rule(400, "error.type", "Arrearage", ErrorReason::InvalidKey, 1)];
        let body = br#"{"error":{"type":"SomethingElse"}}"#;
        let reason = classify(400, &std::collections::HashMap::new(), true, &rules, Some(body), google_default_table);
        assert_eq!(reason, ErrorReason::BadRequest);
    }

    #[test]
    fn disabled_error_parsing_skips_body_entirely() {
        let rules = vec![rule(400, "error.type", ".*", ErrorReason::InvalidKey, 1)];
        let reason = classify(400, &std::collections::HashMap::new(), false, &rules, None, google_default_table);
        assert_eq!(reason, ErrorReason::BadRequest);
    }
}

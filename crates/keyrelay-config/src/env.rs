use regex::Regex;
use std::sync::LazyLock;

/// Matches `${VAR}` and `${VAR:-default}`.
static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap());

/// Substitutes `${VAR}` / `${VAR:-default}` tokens from the process
/// environment before the text is handed to the YAML parser, so
/// substitution applies uniformly to scalars, list items, and keys alike.
pub fn substitute_env(input: &str) -> String {
    VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var = &caps[1];
            let default = caps.get(3).map(|m| m.as_str());
            std::env::var(var).unwrap_or_else(|_| default.unwrap_or_default().to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_present_variable() {
        std::env::set_var("KEYRELAY_TEST_VAR", "hello");
        assert_eq!(substitute_env("value: ${KEYRELAY_TEST_VAR}"), "value: hello");
    }

    #[test]
    fn falls_back_to_default_when_missing() {
        std::env::remove_var("KEYRELAY_TEST_MISSING");
        assert_eq!(
            substitute_env("value: ${KEYRELAY_TEST_MISSING:-fallback}"),
            "value: fallback"
        );
    }

    #[test]
    fn missing_without_default_becomes_empty() {
        std::env::remove_var("KEYRELAY_TEST_MISSING_2");
        assert_eq!(substitute_env("value: ${KEYRELAY_TEST_MISSING_2}"), "value: ");
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        assert_eq!(substitute_env("plain: text"), "plain: text");
    }
}

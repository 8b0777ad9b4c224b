use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/v\d+(beta\d*)?/?$").unwrap());

/// Normalises an OpenAI-compatible base URL: appends `/v1` when no version
/// segment is present. A trailing `#` opts out and is stripped.
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.ends_with('#') {
        return trimmed.trim_end_matches('#').trim_end_matches('/').to_string();
    }

    let without_slash = trimmed.trim_end_matches('/');
    if VERSION_SUFFIX_RE.is_match(trimmed) || without_slash.contains("/v1/") {
        without_slash.to_string()
    } else {
        format!("{without_slash}/v1")
    }
}

/// Blank input falls back to `default`; the result never ends with `/`.
pub fn resolve_base_url(input: &str, default: &str) -> String {
    let raw = if input.trim().is_empty() {
        default
    } else {
        input
    };
    raw.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_base_url_appends_v1_when_missing() {
        assert_eq!(
            check_base_url("http://localhost:11434/"),
            "http://localhost:11434/v1"
        );
    }

    #[test]
    fn check_base_url_keeps_existing_version() {
        assert_eq!(
            check_base_url("https://api.example.com/v2/"),
            "https://api.example.com/v2"
        );
        assert_eq!(
            check_base_url("https://generativelanguage.googleapis.com/v1beta"),
            "https://generativelanguage.googleapis.com/v1beta"
        );
    }

    #[test]
    fn hash_suffix_disables_versioning() {
        assert_eq!(
            check_base_url("https://proxy.example.com/openai/#"),
            "https://proxy.example.com/openai"
        );
    }

    #[test]
    fn blank_base_url_uses_default() {
        assert_eq!(
            resolve_base_url("  ", "https://api-inference.huggingface.co/"),
            "https://api-inference.huggingface.co"
        );
        assert_eq!(
            resolve_base_url("https://mirror.example/", "unused"),
            "https://mirror.example"
        );
    }
}

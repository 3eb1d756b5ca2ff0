//! Tolerant extraction of the image registry URL from CLI output.
//!
//! The shape of `snow spcs image-registry url` output varies between CLI
//! versions and output formats, so candidates are gathered from every string
//! in the response and ranked.
use crate::error::DeployError;
use regex::Regex;
use serde_json::Value;

/// Hostname fragment every account registry URL contains.
pub const REGISTRY_HOST_FRAGMENT: &str = "registry.snowflakecomputing.com";

/// Pick the registry URL out of a raw CLI response and sanitize it.
pub fn extract_registry_url(raw: &str) -> Result<String, DeployError> {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .and_then(|value| {
            let mut strings = Vec::new();
            collect_strings(&value, &mut strings);
            pick_candidate(&strings)
        })
        .or_else(|| {
            match_raw_text(raw)
                .map(|url| sanitize_registry_url(&url))
                .filter(|url| is_usable(url))
        })
        .ok_or_else(|| {
            DeployError::RegistryResolution(format!(
                "no registry URL found in CLI response: {}",
                raw.trim()
            ))
        })
}

/// Strip scheme, surrounding whitespace, and trailing slashes.
pub fn sanitize_registry_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    without_scheme.trim().trim_end_matches('/').to_string()
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.push(text.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// A sanitized host path: non-empty and free of whitespace.
fn is_usable(url: &str) -> bool {
    !url.is_empty() && !url.contains(char::is_whitespace)
}

/// Best usable candidate, sanitized. Strings with whitespace never qualify.
fn pick_candidate(strings: &[String]) -> Option<String> {
    let usable: Vec<(&String, String)> = strings
        .iter()
        .map(|text| (text, sanitize_registry_url(text)))
        .filter(|(_, url)| is_usable(url))
        .collect();
    if let Some((_, exact)) = usable
        .iter()
        .find(|(_, url)| url.to_ascii_lowercase().contains(REGISTRY_HOST_FRAGMENT))
    {
        return Some(exact.clone());
    }
    // Earliest candidate wins ties.
    usable
        .into_iter()
        .map(|(text, url)| (score(text), url))
        .filter(|(score, _)| *score > 0)
        .fold(None, |best: Option<(u32, String)>, candidate| match best {
            Some(current) if current.0 >= candidate.0 => Some(current),
            _ => Some(candidate),
        })
        .map(|(_, url)| url)
}

fn score(text: &str) -> u32 {
    let lower = text.to_ascii_lowercase();
    let mut score = 0;
    if lower.contains("registry") {
        score += 2;
    }
    if lower.contains("snowflake") {
        score += 1;
    }
    if lower.contains("://") {
        score += 1;
    }
    score
}

fn match_raw_text(raw: &str) -> Option<String> {
    let pattern = Regex::new(r"(?i)(?:[a-z][a-z0-9+.-]*://)?[a-z0-9][a-z0-9.-]*registry[a-z0-9.-]*\.[a-z]{2,}(?:/[^\s'\x22,]*)?")
        .ok()?;
    pattern.find(raw).map(|found| found.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_field_json_yields_exact_host() {
        let raw = r#"{"repositoryUrl": "myorg-myacct.registry.snowflakecomputing.com"}"#;
        assert_eq!(
            extract_registry_url(raw).expect("url"),
            "myorg-myacct.registry.snowflakecomputing.com"
        );
    }

    #[test]
    fn scheme_whitespace_and_trailing_slash_are_stripped() {
        let raw = r#"[{"url": "  https://myorg-myacct.registry.snowflakecomputing.com/ "}]"#;
        assert_eq!(
            extract_registry_url(raw).expect("url"),
            "myorg-myacct.registry.snowflakecomputing.com"
        );
    }

    #[test]
    fn nested_values_are_searched_and_scored() {
        let raw = r#"{"data": {"message": "ok", "items": [{"endpoint": "https://registry.example.internal/"}]}}"#;
        assert_eq!(
            extract_registry_url(raw).expect("url"),
            "registry.example.internal"
        );
    }

    #[test]
    fn prose_fields_never_outscore_a_usable_url() {
        let raw = r#"{"message": "Registry URL retrieved from snowflake", "url": "https://myacct.registry.example"}"#;
        assert_eq!(extract_registry_url(raw).expect("url"), "myacct.registry.example");
    }

    #[test]
    fn json_without_usable_candidates_falls_back_to_raw_text() {
        let raw = r#"{"note": "pushed to myorg-myacct.registry.snowflakecomputing.com today"}"#;
        assert_eq!(
            extract_registry_url(raw).expect("url"),
            "myorg-myacct.registry.snowflakecomputing.com"
        );
    }

    #[test]
    fn plain_text_falls_back_to_pattern_match() {
        let raw = "Registry URL: myorg-myacct.registry.snowflakecomputing.com\n";
        assert_eq!(
            extract_registry_url(raw).expect("url"),
            "myorg-myacct.registry.snowflakecomputing.com"
        );
    }

    #[test]
    fn unusable_response_is_a_registry_resolution_error() {
        let err = extract_registry_url(r#"{"status": "ok", "count": 3}"#).expect_err("no url");
        assert!(matches!(err, DeployError::RegistryResolution(_)));
        assert!(err.to_string().contains("\"status\""));
    }
}

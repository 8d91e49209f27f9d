use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+(?:beta\d*)?(?:/|$)").unwrap());

/// Picks the configured base URL (or `default` when blank) and makes sure it
/// carries an API version segment. A trailing `#` means "use verbatim".
pub fn resolve_base_url(configured: &str, default: &str) -> String {
    let trimmed = configured.trim();
    let raw = if trimmed.is_empty() { default.trim() } else { trimmed };
    if raw.is_empty() {
        return String::new();
    }

    if let Some(verbatim) = raw.strip_suffix('#') {
        return verbatim.trim_end_matches('/').to_string();
    }

    let without_slash = raw.trim_end_matches('/');
    if VERSION_SEGMENT_RE.is_match(without_slash) {
        without_slash.to_string()
    } else {
        format!("{}/v1", without_slash)
    }
}

/// `base` + `/` + `path`, with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

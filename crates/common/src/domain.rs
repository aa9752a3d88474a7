//! Target base-domain handling

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://").expect("valid scheme regex"));

/// Normalize a user-supplied base domain to a bare host.
///
/// Blank input falls back to `default`. A leading `http://`/`https://` and
/// trailing slashes are stripped; anything left that looks like a path,
/// query, fragment, or contains whitespace is rejected.
pub fn normalize_base_domain(raw: Option<&str>, default: &str) -> Result<String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(default.to_string());
    }

    let without_scheme = SCHEME_RE.replace(raw, "");
    let host = without_scheme.trim_end_matches('/');
    if host.is_empty() {
        return Ok(default.to_string());
    }

    if host
        .chars()
        .any(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace())
    {
        return Err(Error::InvalidInput(format!(
            "Base domain must be host only (example: {default})"
        )));
    }

    Ok(host.to_string())
}

/// URL handed to the child process for a normalized domain
pub fn base_url(domain: &str) -> String {
    format!("https://{domain}/")
}

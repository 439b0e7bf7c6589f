//! URL canonicalization so equivalent spellings share one cache entry.
//!
//! The engine keys responses by the exact URL string, so the host surface
//! canonicalizes before routing a request to the groups.

use dyncache_core::Error;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

/// Canonical form of `input`.
///
/// - surrounding whitespace trimmed, `https://` assumed when no scheme is given
/// - only `http` and `https` accepted
/// - host lowercased, default port and fragment dropped
/// - path and query kept byte for byte, so signed query strings still match
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let with_scheme = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let mut parsed = url::Url::parse(&with_scheme).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    if parsed.host_str().is_none() {
        return Err(UrlError::InvalidUrl(format!("missing host in {trimmed}")));
    }

    parsed.set_fragment(None);
    Ok(parsed)
}

/// Canonical URL as the string the cache is keyed by.
pub fn cache_url(input: &str) -> Result<String, Error> {
    Ok(canonicalize(input)?.into())
}

//! Domain key extraction shared by the feed and metadata loaders.
//!
//! Both sides of the join MUST use the same rule, otherwise a feed domain
//! can never be found inside a URL domain it should match.

use once_cell::sync::Lazy;
use regex::Regex;

/// Leading `http://` or `https://`, any case.
static SCHEME_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").unwrap());

/// Extract the normalized domain key from a URL.
///
/// Strips the scheme, then keeps everything before the first `/`, then
/// everything before the first `:`. URLs without a scheme are accepted as-is.
///
/// ```
/// use aboutpage_extract::domain::extract_domain;
/// assert_eq!(extract_domain("https://a.example:443/feed"), "a.example");
/// assert_eq!(extract_domain("a.example/x"), "a.example");
/// ```
pub fn extract_domain(url: &str) -> &str {
    let trimmed = url.trim();
    let rest = match SCHEME_PREFIX.find(trimmed) {
        Some(m) => &trimmed[m.end()..],
        None => trimmed,
    };
    let host = rest.split('/').next().unwrap_or("");
    host.split(':').next().unwrap_or("")
}

/// Owned variant that returns `None` for URLs without a usable domain.
pub fn domain_key(url: &str) -> Option<String> {
    let domain = extract_domain(url);
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}

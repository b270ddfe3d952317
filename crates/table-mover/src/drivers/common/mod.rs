//! Helpers shared by the drivers: TLS setup and URL handling.

pub mod tls;

pub use tls::{SslMode, TlsBuilder};

/// Drop a leading `jdbc:` so the rest can be parsed as a native URL.
pub fn strip_jdbc(url: &str) -> &str {
    let trimmed = url.trim();
    match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
        _ => trimmed,
    }
}

/// Remove query parameter `key` from `url`, returning the rewritten URL
/// and the parameter's value if it was present.
pub fn take_query_param(url: &str, key: &str) -> (String, Option<String>) {
    let Some((base, query)) = url.split_once('?') else {
        return (url.to_string(), None);
    };

    let mut value = None;
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((*pair, ""));
            if k.eq_ignore_ascii_case(key) {
                value = Some(v.to_string());
                false
            } else {
                true
            }
        })
        .collect();

    let rewritten = if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    };
    (rewritten, value)
}

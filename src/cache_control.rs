use crate::headers::{HttpHeaders, CACHE_CONTROL};

/// A parsed view of a `Cache-Control` response header.
///
/// Boolean fields are `true` only when the bare directive appeared; the
/// optional fields are `Some` only when the parameterized directive appeared
/// with a well-formed value. Unknown directives are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// `must-revalidate` was present
    pub must_revalidate: bool,
    /// `no-cache` was present
    pub no_cache: bool,
    /// `no-store` was present
    pub no_store: bool,
    /// `no-transform` was present
    pub no_transform: bool,
    /// `public` was present
    pub public: bool,
    /// `private` was present
    pub private: bool,
    /// `proxy-revalidate` was present
    pub proxy_revalidate: bool,
    /// Value of `max-age`, in seconds
    pub max_age: Option<u64>,
    /// Value of `s-maxage`, in seconds
    pub s_maxage: Option<u64>,
    /// Value of `stale-while-revalidate`, in seconds
    pub stale_while_revalidate: Option<u64>,
}

impl CacheControl {
    /// Parses the `Cache-Control` header out of a response header map.
    ///
    /// Returns `None` when the header is absent. A malformed header value
    /// degrades to whatever directives could be read from it, never to an
    /// error.
    #[must_use]
    pub fn parse(headers: &HttpHeaders) -> Option<CacheControl> {
        headers.get(CACHE_CONTROL).map(Self::parse_value)
    }

    /// Parses a raw `Cache-Control` header value.
    ///
    /// Directives are split on commas, trimmed, and matched
    /// case-insensitively. Parameterized values may be quoted.
    #[must_use]
    pub fn parse_value(value: &str) -> CacheControl {
        let mut out = CacheControl::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }
            match directive.split_once('=') {
                None => match directive.to_ascii_lowercase().as_str() {
                    "must-revalidate" => out.must_revalidate = true,
                    "no-cache" => out.no_cache = true,
                    "no-store" => out.no_store = true,
                    "no-transform" => out.no_transform = true,
                    "public" => out.public = true,
                    "private" => out.private = true,
                    "proxy-revalidate" => out.proxy_revalidate = true,
                    _ => {}
                },
                Some((name, raw)) => {
                    let seconds = raw.trim().trim_matches('"').parse::<u64>().ok();
                    match name.trim().to_ascii_lowercase().as_str() {
                        "max-age" => out.max_age = seconds,
                        "s-maxage" => out.s_maxage = seconds,
                        "stale-while-revalidate" => {
                            out.stale_while_revalidate = seconds;
                        }
                        _ => {}
                    }
                }
            }
        }
        out
    }
}

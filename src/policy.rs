//! Freshness decisions over response headers.
//!
//! Everything here is pure: the caller passes the observation time, which
//! keeps the decision functions deterministic and directly testable.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache_control::CacheControl;
use crate::headers::{HttpHeaders, EXPIRES};
use crate::store::CacheEntry;

/// Parses an RFC 1123 HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
///
/// Unparseable dates collapse to the Unix epoch, which downstream freshness
/// checks treat as long expired.
#[must_use]
pub fn http_date(value: &str) -> SystemTime {
    httpdate::parse_http_date(value.trim()).unwrap_or(UNIX_EPOCH)
}

/// Formats an instant as an RFC 1123 HTTP date.
#[must_use]
pub fn format_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

fn is_cacheable_status(status: u16) -> bool {
    matches!(status, 200..=205 | 304)
}

/// Decides whether a completed response may be written to the store.
///
/// Only `GET` responses with a cacheable status are stored, and only when
/// the server gave an explicit lifetime: a `max-age` directive (any value,
/// including zero) or a still-future `Expires` header. `no-store` and
/// `no-cache` always win.
#[must_use]
pub fn should_cache(
    method: &str,
    status: u16,
    headers: &HttpHeaders,
    cache_control: Option<&CacheControl>,
    now: SystemTime,
) -> bool {
    if method != "GET" {
        return false;
    }
    if !is_cacheable_status(status) {
        return false;
    }
    if let Some(cc) = cache_control {
        if cc.no_store || cc.no_cache {
            return false;
        }
        if cc.max_age.is_some() {
            return true;
        }
    }
    match headers.get(EXPIRES) {
        Some(expires) => http_date(expires) > now,
        None => false,
    }
}

/// Computes the absolute instant at which a response goes stale.
///
/// `max-age` takes precedence over `Expires`; with neither, the response is
/// already stale (`now`).
#[must_use]
pub fn expiry_time(
    headers: &HttpHeaders,
    cache_control: Option<&CacheControl>,
    now: SystemTime,
) -> SystemTime {
    if let Some(seconds) = cache_control.and_then(|cc| cc.max_age) {
        return now + Duration::from_secs(seconds);
    }
    if let Some(expires) = headers.get(EXPIRES) {
        return http_date(expires);
    }
    now
}

/// An entry is stale once its expiry instant has passed.
#[must_use]
pub fn is_stale(entry: &CacheEntry, now: SystemTime) -> bool {
    entry.expiry_time < now
}

/// Decides whether a stored entry must be revalidated with the origin
/// before being served. Stale entries are always revalidated, whether or
/// not the response carried `must-revalidate`.
#[must_use]
pub fn should_revalidate(entry: &CacheEntry, now: SystemTime) -> bool {
    is_stale(entry, now)
}

//! Durable storage of completed responses.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CacheError;
use crate::headers::HttpHeaders;
use crate::Response;

mod sqlite;

pub use sqlite::SqliteStore;

/// Key under which a completed response is stored.
///
/// Derived from the request URL, normalized through URL parsing so that
/// syntactic variants of the same location collide. Equality is bytewise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from a request URL.
    ///
    /// Unparseable URLs are keyed by their raw bytes.
    #[must_use]
    pub fn from_url(url: &str) -> CacheKey {
        match Url::parse(url) {
            Ok(parsed) => CacheKey(parsed.to_string()),
            Err(_) => CacheKey(url.to_owned()),
        }
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The request half of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRequest {
    /// HTTP method, always `GET` for stored entries
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers as sent
    pub headers: HttpHeaders,
}

/// The response half of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as received, later updated by revalidations
    pub headers: HttpHeaders,
    /// Response body
    pub body: Vec<u8>,
}

/// One stored request/response pair with its expiry instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Instant after which the entry is stale
    pub expiry_time: SystemTime,
    /// The request that produced the response
    pub request: CachedRequest,
    /// The stored response
    pub response: CachedResponse,
}

impl CacheEntry {
    /// Synthesizes a consumer-visible response from the stored entry.
    #[must_use]
    pub fn to_response(&self) -> Response {
        Response {
            status: self.response.status,
            headers: self.response.headers.clone(),
            body: Bytes::from(self.response.body.clone()),
        }
    }

    /// Folds a `304 Not Modified` revalidation into the entry.
    ///
    /// Headers from the conditional request and its response overwrite the
    /// stored ones by name; status and body stay as stored.
    pub fn absorb_not_modified(
        &mut self,
        request_headers: &HttpHeaders,
        response: &Response,
    ) {
        self.request.headers.merge_from(request_headers);
        self.response.headers.merge_from(&response.headers);
    }
}

/// Durable map from [`CacheKey`] to [`CacheEntry`] with bounded eviction.
///
/// Implementations are internally synchronized: calls may arrive
/// concurrently from any worker thread. Individual operations are atomic at
/// entry granularity.
pub trait CacheStore: Send + Sync {
    /// Looks up an entry, refreshing its recency on a hit.
    ///
    /// Backend failures degrade to `None`; this call never fails.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Stores or replaces an entry.
    fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError>;

    /// Removes one entry. Removing an absent key succeeds.
    fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Evicts entries until the store is within its configured bounds:
    /// expired entries first, then least-recently-accessed entries.
    fn prune(&self) -> Result<(), CacheError>;

    /// Removes every entry.
    fn clear(&self) -> Result<(), CacheError>;
}

pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
        Err(before) => {
            -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX)
        }
    }
}

pub(crate) fn from_unix_seconds(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}

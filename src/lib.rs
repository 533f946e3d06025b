#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
//! An HTTP response cache for streaming asset pipelines, with its own
//! two-pool continuation runtime.
//!
//! The crate layers RFC 7234-style freshness and revalidation on top of any
//! [`Transport`]: responses are persisted in a SQLite-backed [`SqliteStore`],
//! served straight from disk while fresh, revalidated with conditional
//! requests once stale, and pruned in the background on a size budget.
//! Consumers see the plain [`Transport`] contract; the cache is invisible
//! except in latency.
//!
//! All of the work is scheduled on an [`AsyncRuntime`]: cache lookups,
//! revalidations, and store writes run on a worker pool, and the completed
//! response is handed to the consumer from the cooperative main queue the
//! embedder drains once per frame (or whenever it likes) with
//! [`AsyncRuntime::drain_main`].
//!
//! ## Basic usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use asset_cache::{
//!     AsyncRuntime, Bytes, CacheConfig, CachingTransport, Future, Header,
//!     HttpHeaders, Response, Transport,
//! };
//!
//! // The inner transport is whatever actually talks to the network.
//! struct StaticTransport;
//!
//! impl Transport for StaticTransport {
//!     fn request(
//!         &self,
//!         runtime: &AsyncRuntime,
//!         _url: &str,
//!         _headers: &[Header],
//!     ) -> Future<Option<Response>> {
//!         let mut headers = HttpHeaders::new();
//!         headers.append("Cache-Control", "max-age=60");
//!         runtime.resolved(Some(Response {
//!             status: 200,
//!             headers,
//!             body: Bytes::from_static(b"tile"),
//!         }))
//!     }
//!
//!     fn post(
//!         &self,
//!         runtime: &AsyncRuntime,
//!         _url: &str,
//!         _headers: &[Header],
//!         _body: Bytes,
//!     ) -> Future<Option<Response>> {
//!         runtime.resolved(None)
//!     }
//! }
//!
//! fn main() -> Result<(), asset_cache::Error> {
//!     let runtime = AsyncRuntime::default();
//!     let transport = CachingTransport::with_sqlite(
//!         Arc::new(StaticTransport),
//!         CacheConfig {
//!             store_path: "./asset-cache.sqlite".into(),
//!             ..CacheConfig::default()
//!         },
//!     )?;
//!     let response =
//!         transport.request(&runtime, "https://example.com/tile", &[]).wait()?;
//!     assert!(response.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## What gets cached
//!
//! Only `GET` responses with status 200–205 or 304, and only when the server
//! gave an explicit lifetime (`max-age` or a future `Expires`). `no-store`
//! and `no-cache` responses are never written. Stale entries are always
//! revalidated with `If-None-Match`/`If-Modified-Since` before being served
//! again.
//!
//! ## Failure policy
//!
//! Store failures never change what a consumer observes: a broken cache
//! degrades to an uncached transport, with a log record as the only trace.
//! Transport errors pass through unchanged.

mod cache_control;
mod error;
mod headers;
pub mod policy;
mod runtime;
mod store;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, warn};

pub use bytes::Bytes;

pub use cache_control::CacheControl;
pub use error::{BoxError, CacheError, Error, Result, TransportError};
pub use headers::HttpHeaders;
pub use runtime::{AsyncRuntime, Future, Promise};
pub use store::{
    CacheEntry, CacheKey, CacheStore, CachedRequest, CachedResponse,
    SqliteStore,
};

use headers::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

// Custom headers used to indicate cache status (hit or miss)
/// `x-cache` header: HIT if the response was served from the store
pub const XCACHE: &str = "x-cache";
/// `x-cache-lookup` header: HIT if a stored response existed for the key
pub const XCACHELOOKUP: &str = "x-cache-lookup";

/// One request or response header as a (name, value) pair.
pub type Header = (String, String);

/// Represents a basic cache status, used in the `x-cache` and
/// `x-cache-lookup` headers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HitOrMiss {
    /// Yes, there was a hit
    HIT,
    /// No, there was no hit
    MISS,
}

impl fmt::Display for HitOrMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HIT => write!(f, "HIT"),
            Self::MISS => write!(f, "MISS"),
        }
    }
}

/// A completed HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HttpHeaders,
    /// Response body
    pub body: Bytes,
}

impl Response {
    /// First `Content-Type` header value, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(headers::CONTENT_TYPE)
    }
}

/// The contract between asset consumers and anything that can fetch bytes.
///
/// A resolved `None` means the transport failed outright; the caller treats
/// it as unrecoverable for that request. [`CachingTransport`] implements
/// this same trait, so consumers cannot tell whether a cache is in play.
pub trait Transport: Send + Sync + 'static {
    /// Issues a `GET` for `url` and resolves with the completed response.
    fn request(
        &self,
        runtime: &AsyncRuntime,
        url: &str,
        headers: &[Header],
    ) -> Future<Option<Response>>;

    /// Issues a `POST` with the given body. Never cached.
    fn post(
        &self,
        runtime: &AsyncRuntime,
        url: &str,
        headers: &[Header],
        body: Bytes,
    ) -> Future<Option<Response>>;

    /// Pumps underlying I/O. Called from the embedder's main loop.
    fn tick(&self) {}
}

/// Configuration for a [`CachingTransport`] and its store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Filesystem path of the backing SQLite database
    pub store_path: PathBuf,
    /// Upper bound on accounted store size after a prune, in bytes
    pub max_bytes: u64,
    /// Optional upper bound on entry count after a prune
    pub max_entries: Option<u64>,
    /// Responses with bodies larger than this are never stored
    pub max_body_bytes: u64,
    /// A background prune is scheduled every this many requests
    pub requests_per_prune: u32,
    /// Attach `x-cache`/`x-cache-lookup` status headers to responses
    pub cache_status_headers: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            store_path: PathBuf::from("./asset-cache.sqlite"),
            max_bytes: 1024 * 1024 * 1024,
            max_entries: None,
            max_body_bytes: 16 * 1024 * 1024,
            requests_per_prune: 10_000,
            cache_status_headers: true,
        }
    }
}

/// Layers cache lookup, revalidation, and write-back over an inner
/// [`Transport`].
///
/// Shares its store and inner transport with whoever else holds them; all
/// methods are safe to call concurrently from any thread, and every step of
/// a request runs on the runtime's worker pool before the result is handed
/// to the consumer on the main scheduler.
pub struct CachingTransport {
    inner: Arc<dyn Transport>,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    requests_since_prune: AtomicU32,
}

impl CachingTransport {
    /// Wraps `inner`, caching into the given store.
    #[must_use]
    pub fn new(
        inner: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
        config: CacheConfig,
    ) -> Self {
        CachingTransport {
            inner,
            store,
            config,
            requests_since_prune: AtomicU32::new(0),
        }
    }

    /// Wraps `inner`, opening (or creating) a [`SqliteStore`] at
    /// `config.store_path`.
    pub fn with_sqlite(
        inner: Arc<dyn Transport>,
        config: CacheConfig,
    ) -> std::result::Result<Self, CacheError> {
        let store = SqliteStore::open(
            &config.store_path,
            config.max_bytes,
            config.max_entries,
        )?;
        Ok(Self::new(inner, Arc::new(store), config))
    }

    /// The shared cache store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    fn maybe_schedule_prune(&self, runtime: &AsyncRuntime) {
        let since = self.requests_since_prune.fetch_add(1, Ordering::Relaxed) + 1;
        if since >= self.config.requests_per_prune.max(1) {
            // Concurrent requests may race past the threshold and schedule
            // an extra prune; that is harmless.
            self.requests_since_prune.store(0, Ordering::Relaxed);
            let store = Arc::clone(&self.store);
            debug!("scheduling background cache prune");
            drop(runtime.spawn_worker(move || {
                if let Err(err) = store.prune() {
                    warn!("cache prune failed: {err}");
                }
            }));
        }
    }
}

impl Transport for CachingTransport {
    fn request(
        &self,
        runtime: &AsyncRuntime,
        url: &str,
        headers: &[Header],
    ) -> Future<Option<Response>> {
        self.maybe_schedule_prune(runtime);

        let inner = Arc::clone(&self.inner);
        let store = Arc::clone(&self.store);
        let runtime_for_chain = runtime.clone();
        let url = url.to_owned();
        let request_headers: Vec<Header> = headers.to_vec();
        let cache_status_headers = self.config.cache_status_headers;
        let max_body_bytes = self.config.max_body_bytes;

        runtime
            .spawn_worker_future(move || {
                let key = CacheKey::from_url(&url);
                let entry = match store.get(&key) {
                    // No stored entry; fetch and maybe write back.
                    None => {
                        let fetch = inner.request(
                            &runtime_for_chain,
                            &url,
                            &request_headers,
                        );
                        return fetch.then_worker(move |completed| {
                            let response = completed?;
                            store_response(
                                &*store,
                                &key,
                                &url,
                                &request_headers,
                                &response,
                                max_body_bytes,
                            );
                            Some(with_cache_status(
                                response,
                                HitOrMiss::MISS,
                                HitOrMiss::MISS,
                                cache_status_headers,
                            ))
                        });
                    }
                    Some(entry) => entry,
                };

                if !policy::should_revalidate(&entry, SystemTime::now()) {
                    // Fresh hit, served without touching the network.
                    let response = with_cache_status(
                        entry.to_response(),
                        HitOrMiss::HIT,
                        HitOrMiss::HIT,
                        cache_status_headers,
                    );
                    return runtime_for_chain.resolved(Some(response));
                }

                // Stale hit: revalidate with a conditional request.
                let mut conditional = request_headers.clone();
                if let Some(etag) = entry.response.headers.get(ETAG) {
                    conditional
                        .push((IF_NONE_MATCH.to_owned(), etag.to_owned()));
                } else if let Some(modified) =
                    entry.response.headers.get(LAST_MODIFIED)
                {
                    conditional.push((
                        IF_MODIFIED_SINCE.to_owned(),
                        modified.to_owned(),
                    ));
                }

                let fetch =
                    inner.request(&runtime_for_chain, &url, &conditional);
                fetch.then_worker(move |completed| {
                    let response = completed?;
                    if response.status == 304 {
                        let mut merged = entry;
                        merged.absorb_not_modified(
                            &headers_from_pairs(&conditional),
                            &response,
                        );
                        store_revalidated(
                            &*store,
                            &key,
                            &mut merged,
                            max_body_bytes,
                        );
                        return Some(with_cache_status(
                            merged.to_response(),
                            HitOrMiss::HIT,
                            HitOrMiss::HIT,
                            cache_status_headers,
                        ));
                    }
                    store_response(
                        &*store,
                        &key,
                        &url,
                        &conditional,
                        &response,
                        max_body_bytes,
                    );
                    Some(with_cache_status(
                        response,
                        HitOrMiss::MISS,
                        HitOrMiss::HIT,
                        cache_status_headers,
                    ))
                })
            })
            // The consumer always observes completion from the main
            // scheduler, whatever path produced the response.
            .then_main(|response| response)
    }

    fn post(
        &self,
        runtime: &AsyncRuntime,
        url: &str,
        headers: &[Header],
        body: Bytes,
    ) -> Future<Option<Response>> {
        // An unsafe method may have changed the resource; drop whatever is
        // stored for it.
        let store = Arc::clone(&self.store);
        let key = CacheKey::from_url(url);
        drop(runtime.spawn_worker(move || {
            if let Err(err) = store.delete(&key) {
                warn!("could not invalidate cache entry for {key}: {err}");
            }
        }));
        self.inner.post(runtime, url, headers, body)
    }

    fn tick(&self) {
        self.inner.tick();
    }
}

impl fmt::Debug for CachingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn headers_from_pairs(pairs: &[Header]) -> HttpHeaders {
    pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect()
}

fn with_cache_status(
    mut response: Response,
    cache: HitOrMiss,
    lookup: HitOrMiss,
    enabled: bool,
) -> Response {
    if enabled {
        response.headers.set(XCACHE, cache.to_string());
        response.headers.set(XCACHELOOKUP, lookup.to_string());
    }
    response
}

/// Writes a completed network response back to the store when policy allows.
///
/// Storage failures are logged and swallowed: the caller proceeds as if
/// caching were disabled.
fn store_response(
    store: &dyn CacheStore,
    key: &CacheKey,
    url: &str,
    request_headers: &[Header],
    response: &Response,
    max_body_bytes: u64,
) {
    let now = SystemTime::now();
    let cache_control = CacheControl::parse(&response.headers);
    if !policy::should_cache(
        "GET",
        response.status,
        &response.headers,
        cache_control.as_ref(),
        now,
    ) {
        return;
    }
    if response.body.len() as u64 > max_body_bytes {
        debug!(
            "not storing {url}: body of {} bytes exceeds the limit",
            response.body.len()
        );
        return;
    }
    let entry = CacheEntry {
        expiry_time: policy::expiry_time(
            &response.headers,
            cache_control.as_ref(),
            now,
        ),
        request: CachedRequest {
            method: "GET".to_owned(),
            url: url.to_owned(),
            headers: headers_from_pairs(request_headers),
        },
        response: CachedResponse {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.to_vec(),
        },
    };
    if let Err(err) = store.put(key, entry) {
        warn!("failed to store response for {url}: {err}");
    }
}

/// Re-stores an entry whose headers were refreshed by a `304`, with a newly
/// computed expiry.
fn store_revalidated(
    store: &dyn CacheStore,
    key: &CacheKey,
    entry: &mut CacheEntry,
    max_body_bytes: u64,
) {
    let now = SystemTime::now();
    let cache_control = CacheControl::parse(&entry.response.headers);
    if !policy::should_cache(
        &entry.request.method,
        entry.response.status,
        &entry.response.headers,
        cache_control.as_ref(),
        now,
    ) {
        return;
    }
    if entry.response.body.len() as u64 > max_body_bytes {
        return;
    }
    entry.expiry_time = policy::expiry_time(
        &entry.response.headers,
        cache_control.as_ref(),
        now,
    );
    if let Err(err) = store.put(key, entry.clone()) {
        warn!("failed to refresh entry for {}: {err}", entry.request.url);
    }
}

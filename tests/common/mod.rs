//! Shared test doubles: a scripted transport and a failing store.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use asset_cache::{
    AsyncRuntime, Bytes, CacheEntry, CacheError, CacheKey, CacheStore,
    CachedRequest, CachedResponse, Error, Future, Header, HttpHeaders,
    Response, Transport,
};

/// Builds a response from literal parts.
pub fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Response {
    Response {
        status,
        headers: headers.iter().copied().collect(),
        body: Bytes::copy_from_slice(body),
    }
}

/// Builds a stored entry the way the caching layer would have written it.
pub fn entry(
    url: &str,
    response_headers: &[(&str, &str)],
    body: &[u8],
    expires_in: i64,
) -> CacheEntry {
    let now = SystemTime::now();
    let expiry_time = if expires_in >= 0 {
        now + Duration::from_secs(expires_in.unsigned_abs())
    } else {
        now - Duration::from_secs(expires_in.unsigned_abs())
    };
    CacheEntry {
        expiry_time,
        request: CachedRequest {
            method: "GET".into(),
            url: url.into(),
            headers: HttpHeaders::new(),
        },
        response: CachedResponse {
            status: 200,
            headers: response_headers.iter().copied().collect(),
            body: body.to_vec(),
        },
    }
}

type Scripted = Result<Option<Response>, Error>;

/// A transport that replays scripted responses and records every call.
///
/// An empty script resolves with `None`, the transport-failure signal.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<(String, Vec<Header>)>>,
    posts: Mutex<Vec<(String, Vec<Header>, Bytes)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Response) {
        self.script.lock().unwrap().push_back(Ok(Some(response)));
    }

    pub fn push_null(&self) {
        self.script.lock().unwrap().push_back(Ok(None));
    }

    pub fn push_error(&self, error: Error) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    /// Headers of the `index`-th recorded GET.
    pub fn request_headers(&self, index: usize) -> Vec<Header> {
        self.requests.lock().unwrap()[index].1.clone()
    }

    pub fn header_value(&self, index: usize, name: &str) -> Option<String> {
        self.request_headers(index)
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

impl Transport for MockTransport {
    fn request(
        &self,
        runtime: &AsyncRuntime,
        url: &str,
        headers: &[Header],
    ) -> Future<Option<Response>> {
        self.requests.lock().unwrap().push((url.to_owned(), headers.to_vec()));
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(response)) => runtime.resolved(response),
            Some(Err(error)) => runtime.rejected(error),
            None => runtime.resolved(None),
        }
    }

    fn post(
        &self,
        runtime: &AsyncRuntime,
        url: &str,
        headers: &[Header],
        body: Bytes,
    ) -> Future<Option<Response>> {
        self.posts.lock().unwrap().push((url.to_owned(), headers.to_vec(), body));
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(response)) => runtime.resolved(response),
            Some(Err(error)) => runtime.rejected(error),
            None => runtime.resolved(None),
        }
    }
}

/// A store whose writes always fail, for exercising the degraded path.
#[derive(Debug, Default)]
pub struct FailingStore;

fn storage_error() -> CacheError {
    CacheError::Storage("disk on fire".into())
}

impl CacheStore for FailingStore {
    fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
        None
    }

    fn put(&self, _key: &CacheKey, _entry: CacheEntry) -> Result<(), CacheError> {
        Err(storage_error())
    }

    fn delete(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Err(storage_error())
    }

    fn prune(&self) -> Result<(), CacheError> {
        Err(storage_error())
    }

    fn clear(&self) -> Result<(), CacheError> {
        Err(storage_error())
    }
}

/// Polls `check` until it passes or a generous deadline expires.
pub fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = SystemTime::now() + Duration::from_secs(5);
    while !check() {
        assert!(SystemTime::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

use thiserror::Error;

/// A boxed error payload carried by backend failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A `Result` typedef to use with the [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// Failures produced by an inner [`Transport`](crate::Transport).
///
/// These surface to the consumer unchanged; the caching layer never remaps
/// or swallows them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection to the origin could not be established
    #[error("connection failed: {0}")]
    Connect(String),
    /// The origin responded with something the transport could not interpret
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The origin responded with an unexpected status code
    #[error("unexpected status code {0}")]
    Status(u16),
    /// The transport completed without producing a response
    #[error("no response received")]
    NullResponse,
}

/// Failures inside the cache store.
///
/// Store failures are recovered locally: the request proceeds as if caching
/// were disabled, and the failure is logged rather than surfaced.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// I/O or backend failure while reading or writing the store
    #[error("storage backend: {0}")]
    Storage(#[source] BoxError),
    /// A stored record could not be decoded
    #[error("corrupt cache record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Storage(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Corrupt(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(Box::new(err))
    }
}

/// The rejection type carried by [`Future`](crate::Future).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error from the inner transport
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Error from the cache store
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The producing task was dropped before fulfilling its future
    #[error("task abandoned before completion")]
    Abandoned,
}

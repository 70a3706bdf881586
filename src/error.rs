//! Error types shared by the loader, the definition store and the offline cache.

use thiserror::Error;

/// Failures while fetching a manifest, a source document or a cached asset.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Nothing exists at the requested path.
    #[error("not found: {0}")]
    NotFound(String),
    /// The fetcher only serves GET requests.
    #[error("unsupported method {method} for {path}")]
    UnsupportedMethod { method: String, path: String },
    /// The path would resolve outside the data root.
    #[error("path escapes the data root: {0}")]
    OutsideRoot(String),
    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while persisting definitions.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize definitions: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by the offline cache's own bookkeeping.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Pre-caching is all-or-nothing; the first failing asset aborts it.
    #[error("failed to pre-cache {path}: {source}")]
    Install {
        path: String,
        #[source]
        source: FetchError,
    },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
}

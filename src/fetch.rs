use crate::error::FetchError;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        f.write_str(label)
    }
}

/// A request for a path relative to the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub path: String,
    /// Skip any cached copy and go to the network.
    pub cache_bust: bool,
}

impl FetchRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            cache_bust: false,
        }
    }

    pub fn busted(mut self, cache_bust: bool) -> Self {
        self.cache_bust = cache_bust;
        self
    }
}

/// Something that can resolve a [`FetchRequest`] to bytes.
///
/// Implementations must be shareable across tasks: the loader issues every
/// source fetch on its own task.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Serves files from a directory on disk.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(FetchError::OutsideRoot(path.to_string())),
            }
        }
        Ok(resolved)
    }
}

impl Fetcher for FsFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, FetchError> {
        if request.method != Method::Get {
            return Err(FetchError::UnsupportedMethod {
                method: request.method.to_string(),
                path: request.path,
            });
        }
        let resolved = self.resolve(&request.path)?;
        debug!(path = %request.path, file = %resolved.display(), "reading from data root");
        tokio::fs::read(&resolved).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                FetchError::NotFound(request.path.clone())
            } else {
                FetchError::Io {
                    path: request.path.clone(),
                    source: err,
                }
            }
        })
    }
}

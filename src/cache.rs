//! Versioned, on-disk offline cache that sits in front of another fetcher.
//!
//! Every cache lives in its own directory named after its version tag, and
//! each asset is a file named by its percent-encoded path. Changing the asset
//! list means bumping the tag; activation then drops every other version.

use crate::error::{CacheError, FetchError};
use crate::fetch::{FetchRequest, Fetcher, Method};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

pub const DEFAULT_CACHE_NAME: &str = "study-guide-v1";

pub struct OfflineCache<N> {
    network: N,
    root: PathBuf,
    name: String,
    assets: Vec<String>,
}

impl<N: Fetcher> OfflineCache<N> {
    pub fn new(
        network: N,
        root: impl Into<PathBuf>,
        name: impl Into<String>,
        assets: Vec<String>,
    ) -> Self {
        Self {
            network,
            root: root.into(),
            name: name.into(),
            assets,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetches every pre-cache asset from the network and stores them. If any
    /// asset fails nothing is written.
    pub async fn install(&self) -> Result<usize, CacheError> {
        let mut fetched = Vec::with_capacity(self.assets.len());
        for asset in &self.assets {
            let bytes = self
                .network
                .fetch(FetchRequest::get(asset.clone()))
                .await
                .map_err(|source| CacheError::Install {
                    path: asset.clone(),
                    source,
                })?;
            fetched.push((asset, bytes));
        }
        fs::create_dir_all(self.cache_dir()).await?;
        for (asset, bytes) in &fetched {
            self.write_entry(asset, bytes).await?;
        }
        info!(cache = %self.name, assets = fetched.len(), "offline cache installed");
        Ok(fetched.len())
    }

    /// Deletes every cache directory that belongs to another version.
    /// Returns the names that were removed.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let current = encode(&self.name);
        let mut removed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == current || !entry.file_type().await?.is_dir() {
                continue;
            }
            fs::remove_dir_all(entry.path()).await?;
            removed.push(decode(&file_name));
        }
        if !removed.is_empty() {
            info!(cache = %self.name, removed = ?removed, "stale offline caches deleted");
        }
        Ok(removed)
    }

    /// Paths currently held by this cache version, sorted.
    pub async fn cached_paths(&self) -> Result<Vec<String>, CacheError> {
        let mut entries = match fs::read_dir(self.cache_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.ends_with(".tmp") {
                continue;
            }
            paths.push(decode(&file_name));
        }
        paths.sort();
        Ok(paths)
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join(encode(&self.name))
    }

    fn entry_path(&self, path: &str) -> PathBuf {
        self.cache_dir().join(encode(canonical(path)))
    }

    async fn read_entry(&self, path: &str) -> Option<Vec<u8>> {
        fs::read(self.entry_path(path)).await.ok()
    }

    async fn write_entry(&self, path: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let target = self.entry_path(path);
        let staging = target.with_extension("tmp");
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, &target).await?;
        Ok(())
    }
}

impl<N: Fetcher> Fetcher for OfflineCache<N> {
    /// Cache first, then network. A network response refreshes the stored
    /// copy; non-GET requests go straight to the network.
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, FetchError> {
        if request.method != Method::Get {
            return self.network.fetch(request).await;
        }
        if !request.cache_bust {
            if let Some(bytes) = self.read_entry(&request.path).await {
                debug!(path = %request.path, cache = %self.name, "offline cache hit");
                return Ok(bytes);
            }
        }
        debug!(path = %request.path, busted = request.cache_bust, "offline cache miss");
        let path = request.path.clone();
        let bytes = self.network.fetch(request).await?;
        let stored = match fs::create_dir_all(self.cache_dir()).await {
            Ok(()) => self.write_entry(&path, &bytes).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = stored {
            warn!(path = %path, error = %err, "failed to refresh offline cache entry");
        }
        Ok(bytes)
    }
}

fn canonical(path: &str) -> &str {
    path.trim_start_matches("./").trim_start_matches('/')
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeNetwork {
        files: Mutex<HashMap<String, Vec<u8>>>,
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeNetwork {
        fn with(files: &[(&str, &str)]) -> Arc<Self> {
            let network = Self::default();
            for (path, body) in files {
                network
                    .files
                    .lock()
                    .insert(path.to_string(), body.as_bytes().to_vec());
            }
            Arc::new(network)
        }

        fn set(&self, path: &str, body: &str) {
            self.files
                .lock()
                .insert(path.to_string(), body.as_bytes().to_vec());
        }
    }

    impl Fetcher for Arc<FakeNetwork> {
        async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::NotFound(request.path));
            }
            if request.method != Method::Get {
                return Ok(b"posted".to_vec());
            }
            self.files
                .lock()
                .get(&request.path)
                .cloned()
                .ok_or(FetchError::NotFound(request.path))
        }
    }

    fn cache(
        network: &Arc<FakeNetwork>,
        root: &std::path::Path,
        name: &str,
        assets: &[&str],
    ) -> OfflineCache<Arc<FakeNetwork>> {
        OfflineCache::new(
            Arc::clone(network),
            root,
            name,
            assets.iter().map(|a| a.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn install_precaches_and_serves_offline() {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::with(&[("data/index.json", "{\"files\":[]}")]);
        let cache = cache(&network, dir.path(), "v1", &["data/index.json"]);
        assert_eq!(cache.install().await.unwrap(), 1);
        network.offline.store(true, Ordering::SeqCst);
        let bytes = cache
            .fetch(FetchRequest::get("data/index.json"))
            .await
            .unwrap();
        assert_eq!(bytes, b"{\"files\":[]}");
        assert_eq!(cache.cached_paths().await.unwrap(), vec!["data/index.json"]);
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::with(&[("a.json", "a")]);
        let cache = cache(&network, dir.path(), "v1", &["a.json", "missing.json"]);
        let err = cache.install().await.unwrap_err();
        assert!(matches!(err, CacheError::Install { ref path, .. } if path == "missing.json"));
        assert!(cache.cached_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn miss_goes_to_network_then_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::with(&[("s.json", "first")]);
        let cache = cache(&network, dir.path(), "v1", &[]);
        assert_eq!(cache.fetch(FetchRequest::get("s.json")).await.unwrap(), b"first");
        network.set("s.json", "second");
        assert_eq!(cache.fetch(FetchRequest::get("s.json")).await.unwrap(), b"first");
        assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_bust_refreshes_stored_copy() {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::with(&[("s.json", "first")]);
        let cache = cache(&network, dir.path(), "v1", &[]);
        cache.fetch(FetchRequest::get("s.json")).await.unwrap();
        network.set("s.json", "second");
        let busted = cache
            .fetch(FetchRequest::get("s.json").busted(true))
            .await
            .unwrap();
        assert_eq!(busted, b"second");
        assert_eq!(cache.fetch(FetchRequest::get("s.json")).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn offline_miss_fails() {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::with(&[]);
        network.offline.store(true, Ordering::SeqCst);
        let cache = cache(&network, dir.path(), "v1", &[]);
        assert!(cache.fetch(FetchRequest::get("x.json")).await.is_err());
    }

    #[tokio::test]
    async fn non_get_passes_through_uncached() {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::with(&[]);
        let cache = cache(&network, dir.path(), "v1", &[]);
        let mut request = FetchRequest::get("form");
        request.method = Method::Post;
        assert_eq!(cache.fetch(request).await.unwrap(), b"posted");
        assert!(cache.cached_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activate_removes_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::with(&[("a.json", "a")]);
        let old = cache(&network, dir.path(), "study-guide-v0", &["a.json"]);
        old.install().await.unwrap();
        let current = cache(&network, dir.path(), "study-guide-v1", &["a.json"]);
        current.install().await.unwrap();
        let removed = current.activate().await.unwrap();
        assert_eq!(removed, vec!["study-guide-v0"]);
        assert!(old.cached_paths().await.unwrap().is_empty());
        assert_eq!(current.cached_paths().await.unwrap(), vec!["a.json"]);
    }
}

use crate::fetch::{FetchRequest, Fetcher};
use crate::source::{Manifest, RawSource, Source};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub const DEFAULT_MANIFEST_PATH: &str = "data/index.json";

/// What the manifest fetch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestStatus {
    /// The manifest listed this many files.
    Listed(usize),
    /// The manifest was readable but listed nothing.
    Empty,
    /// The manifest could not be fetched or parsed.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub sources: Vec<Source>,
    pub manifest: ManifestStatus,
}

impl LoadOutcome {
    pub fn empty(manifest: ManifestStatus) -> Self {
        Self {
            sources: Vec::new(),
            manifest,
        }
    }

    /// Number of listed files that failed to load.
    pub fn failed(&self) -> usize {
        match self.manifest {
            ManifestStatus::Listed(listed) => listed.saturating_sub(self.sources.len()),
            _ => 0,
        }
    }
}

/// Fetches the manifest and every source document it lists.
pub struct SourceLoader<F> {
    fetcher: Arc<F>,
    manifest_path: String,
}

impl<F> Clone for SourceLoader<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            manifest_path: self.manifest_path.clone(),
        }
    }
}

impl<F: Fetcher> SourceLoader<F> {
    pub fn new(fetcher: F, manifest_path: impl Into<String>) -> Self {
        Self::from_shared(Arc::new(fetcher), manifest_path)
    }

    pub fn from_shared(fetcher: Arc<F>, manifest_path: impl Into<String>) -> Self {
        Self {
            fetcher,
            manifest_path: manifest_path.into(),
        }
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    pub fn manifest_path(&self) -> &str {
        &self.manifest_path
    }

    /// Loads every source in the manifest. Never fails: an unreadable
    /// manifest yields an empty outcome and a failing file is left out.
    pub async fn load(&self, force_reload: bool) -> LoadOutcome {
        let Some(manifest) = self.fetch_manifest(force_reload).await else {
            return LoadOutcome::empty(ManifestStatus::Unavailable);
        };
        if manifest.files.is_empty() {
            info!(manifest = %self.manifest_path, "manifest lists no sources");
            return LoadOutcome::empty(ManifestStatus::Empty);
        }

        let listed = manifest.files.len();
        let mut tasks = JoinSet::new();
        for (position, file) in manifest.files.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            tasks.spawn(async move {
                let loaded = load_source_file(fetcher.as_ref(), &file, force_reload).await;
                (position, file, loaded)
            });
        }

        let mut loaded = Vec::with_capacity(listed);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, _, Some(source))) => loaded.push((position, source)),
                Ok((_, file, None)) => warn!(file = %file, "source excluded from load"),
                Err(err) => warn!(error = %err, "source fetch task aborted"),
            }
        }
        loaded.sort_by_key(|(position, _)| *position);
        let sources: Vec<Source> = loaded.into_iter().map(|(_, source)| source).collect();
        info!(
            listed,
            loaded = sources.len(),
            force_reload,
            "sources loaded"
        );
        LoadOutcome {
            sources,
            manifest: ManifestStatus::Listed(listed),
        }
    }

    async fn fetch_manifest(&self, force_reload: bool) -> Option<Manifest> {
        let request = FetchRequest::get(self.manifest_path.clone()).busted(force_reload);
        let bytes = match self.fetcher.fetch(request).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(manifest = %self.manifest_path, error = %err, "manifest unavailable");
                return None;
            }
        };
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                warn!(manifest = %self.manifest_path, error = %err, "manifest malformed");
                None
            }
        }
    }
}

async fn load_source_file<F: Fetcher>(
    fetcher: &F,
    file: &str,
    force_reload: bool,
) -> Option<Source> {
    let request = FetchRequest::get(file).busted(force_reload);
    let bytes = match fetcher.fetch(request).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(file, error = %err, "source fetch failed");
            return None;
        }
    };
    match serde_json::from_slice::<RawSource>(&bytes) {
        Ok(raw) => Some(raw.into_source(file)),
        Err(err) => {
            warn!(file, error = %err, "source document malformed");
            None
        }
    }
}

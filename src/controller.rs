//! Host shell around [`AppState`]: owns the definition store, runs the
//! effects the reducer returns, and wires the configured fetch stack.

use crate::cache::OfflineCache;
use crate::config::AppConfig;
use crate::definitions::DefinitionStore;
use crate::error::{FetchError, StoreError};
use crate::fetch::{FetchRequest, Fetcher, FsFetcher};
use crate::loader::SourceLoader;
use crate::state::{AppState, Effect, Event};
use crate::view::{self, PageView};
use tracing::info;

/// Fetch stack selected by configuration: straight from disk, or through the
/// offline cache.
pub enum DataFetcher {
    Direct(FsFetcher),
    Cached(OfflineCache<FsFetcher>),
}

impl DataFetcher {
    pub fn from_config(config: &AppConfig) -> Self {
        let direct = FsFetcher::new(&config.data_root);
        if config.offline {
            Self::Cached(OfflineCache::new(
                direct,
                &config.cache_root,
                &config.cache_name,
                config.precache.clone(),
            ))
        } else {
            Self::Direct(direct)
        }
    }

    pub fn offline_cache(&self) -> Option<&OfflineCache<FsFetcher>> {
        match self {
            Self::Cached(cache) => Some(cache),
            Self::Direct(_) => None,
        }
    }
}

impl Fetcher for DataFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::Direct(fetcher) => fetcher.fetch(request).await,
            Self::Cached(cache) => cache.fetch(request).await,
        }
    }
}

pub fn loader_from_config(config: &AppConfig) -> SourceLoader<DataFetcher> {
    SourceLoader::new(DataFetcher::from_config(config), config.manifest.clone())
}

pub struct Controller {
    state: AppState,
    store: DefinitionStore,
}

impl Controller {
    /// Starts a controller with the definitions already in `store`.
    pub fn open(store: DefinitionStore) -> Self {
        let mut state = AppState::new();
        state.apply(Event::DefinitionsLoaded(store.load()));
        Self { state, store }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn view(&self) -> PageView {
        view::render(&self.state)
    }

    /// Applies `event`, writes any definition changes, and hands back the
    /// effects that belong to the presentation layer.
    pub fn dispatch(&mut self, event: Event) -> Result<Vec<Effect>, StoreError> {
        let effects = self.state.apply(event);
        let mut remaining = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::PersistDefinitions(definitions) => self.store.persist(&definitions)?,
                other => remaining.push(other),
            }
        }
        Ok(remaining)
    }

    /// Loads sources and applies them. Suitable when the controller is not
    /// shared; shared hosts dispatch the two events around their own await.
    pub async fn reload<F: Fetcher>(
        &mut self,
        loader: &SourceLoader<F>,
        force_reload: bool,
    ) -> Result<(), StoreError> {
        self.dispatch(Event::LoadStarted)?;
        let outcome = loader.load(force_reload).await;
        info!(
            sources = outcome.sources.len(),
            failed = outcome.failed(),
            "applying loaded sources"
        );
        self.dispatch(Event::SourcesLoaded(outcome))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn saved_definition_survives_a_new_controller() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("site");
        fs::create_dir_all(data.join("data")).unwrap();
        fs::write(data.join("data/index.json"), r#"{"files": ["data/a.json"]}"#).unwrap();
        fs::write(
            data.join("data/a.json"),
            r#"{"title": "A", "sections": [{"heading": "Ch1", "verbatimText": "the cat sat on the mat"}]}"#,
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.data_root = data;
        config.set_storage_dir(dir.path().join("store"));

        let loader = loader_from_config(&config);
        let mut controller = Controller::open(DefinitionStore::persistent(&config.storage_dir));
        controller.reload(&loader, false).await.unwrap();
        controller
            .dispatch(Event::BeginSelection(" Cat ".into()))
            .unwrap();
        controller
            .dispatch(Event::SaveDefinition("a feline".into()))
            .unwrap();

        let reopened = Controller::open(DefinitionStore::persistent(&config.storage_dir));
        let definition = reopened.state().definitions().find("cat").unwrap();
        assert_eq!(definition.key, "cat");
        assert_eq!(definition.phrase, "Cat");
        assert_eq!(definition.definition, "a feline");
    }

    #[tokio::test]
    async fn offline_config_reads_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("site");
        fs::create_dir_all(data.join("data")).unwrap();
        fs::write(data.join("data/index.json"), r#"{"files": []}"#).unwrap();
        let mut config = AppConfig::default();
        config.data_root = data.clone();
        config.set_storage_dir(dir.path().join("store"));
        config.offline = true;

        let loader = loader_from_config(&config);
        let cache = loader.fetcher().offline_cache().unwrap();
        cache.install().await.unwrap();
        fs::remove_file(data.join("data/index.json")).unwrap();

        let mut controller = Controller::open(DefinitionStore::ephemeral());
        controller.reload(&loader, false).await.unwrap();
        assert_eq!(
            controller.state().status(),
            crate::state::STATUS_NO_SOURCES
        );
        assert!(controller.view().content.is_empty());
    }

    #[tokio::test]
    async fn spotlight_effects_are_returned_to_the_host() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/index.json"), r#"{"files": ["data/a.json"]}"#).unwrap();
        fs::write(
            dir.path().join("data/a.json"),
            r#"{"sections": [{"verbatimText": "alpha\n\nbeta"}]}"#,
        )
        .unwrap();
        let loader = SourceLoader::new(
            DataFetcher::Direct(FsFetcher::new(dir.path())),
            "data/index.json",
        );
        let mut controller = Controller::open(DefinitionStore::ephemeral());
        controller.reload(&loader, true).await.unwrap();
        controller.dispatch(Event::Search("beta".into())).unwrap();
        let effects = controller.dispatch(Event::OpenResult(0)).unwrap();
        assert_eq!(effects, vec![Effect::Spotlight("p-s0-0-1".into())]);
    }
}

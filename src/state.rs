//! Application state and the event reducer.
//!
//! Every mutation happens inside [`AppState::apply`]. Side effects that
//! leave the process (writing definitions, scrolling a paragraph into view)
//! come back as [`Effect`]s for the host to run.

use crate::definitions::{Definition, DefinitionBook, now_millis};
use crate::index::ParagraphIndex;
use crate::loader::{LoadOutcome, ManifestStatus};
use crate::search::{self, SearchOutcome};
use crate::source::{Source, collapse_whitespace};
use tracing::debug;

pub const MIN_SELECTION_CHARS: usize = 2;
pub const MAX_SELECTION_CHARS: usize = 160;

pub const STATUS_LOADING: &str = "Loading sources...";
pub const STATUS_NO_SOURCES: &str = "No sources found. Add files to data/index.json.";
pub const EMPTY_DEFINITION_ERROR: &str = "Definition cannot be empty.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LoadStarted,
    SourcesLoaded(LoadOutcome),
    DefinitionsLoaded(DefinitionBook),
    SelectSource(String),
    Search(String),
    ClearSearch,
    /// Open the n-th search result.
    OpenResult(usize),
    /// Table-of-contents navigation to a paragraph.
    JumpTo(String),
    BeginSelection(String),
    CancelSelection,
    SaveDefinition(String),
    EditDefinition(String),
    RemoveDefinition(String),
    FindDefinition(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write the full definition list to durable storage.
    PersistDefinitions(Vec<Definition>),
    /// Bring a paragraph into view and flash it.
    Spotlight(String),
}

/// The phrase being defined and the text typed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionDraft {
    pub phrase: String,
    pub draft: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSearch {
    pub term: String,
    pub outcome: SearchOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    sources: Vec<Source>,
    index: ParagraphIndex,
    active_source: Option<String>,
    search: Option<ActiveSearch>,
    definitions: DefinitionBook,
    selection: Option<SelectionDraft>,
    status: String,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn index(&self) -> &ParagraphIndex {
        &self.index
    }

    pub fn active_source_id(&self) -> Option<&str> {
        self.active_source.as_deref()
    }

    /// The active source with its position in the loaded list.
    pub fn active_source(&self) -> Option<(usize, &Source)> {
        let id = self.active_source.as_deref()?;
        self.sources
            .iter()
            .enumerate()
            .find(|(_, source)| source.id == id)
    }

    pub fn search(&self) -> Option<&ActiveSearch> {
        self.search.as_ref()
    }

    pub fn search_term(&self) -> &str {
        self.search.as_ref().map(|s| s.term.as_str()).unwrap_or("")
    }

    pub fn definitions(&self) -> &DefinitionBook {
        &self.definitions
    }

    pub fn selection(&self) -> Option<&SelectionDraft> {
        self.selection.as_ref()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        debug!(?event, "applying event");
        match event {
            Event::LoadStarted => {
                self.status = STATUS_LOADING.to_string();
                Vec::new()
            }
            Event::SourcesLoaded(outcome) => {
                self.replace_sources(outcome);
                Vec::new()
            }
            Event::DefinitionsLoaded(book) => {
                self.definitions = book;
                self.refresh_status();
                Vec::new()
            }
            Event::SelectSource(id) => {
                if self.sources.iter().any(|source| source.id == id) {
                    self.active_source = Some(id);
                }
                Vec::new()
            }
            Event::Search(query) => {
                self.run_search(&query);
                Vec::new()
            }
            Event::ClearSearch => {
                self.search = None;
                Vec::new()
            }
            Event::OpenResult(position) => self.open_result(position),
            Event::JumpTo(dom_id) => match self.index.get(&dom_id) {
                Some(record) => {
                    self.active_source = Some(record.source_id.clone());
                    vec![Effect::Spotlight(dom_id)]
                }
                None => Vec::new(),
            },
            Event::BeginSelection(text) => {
                self.begin_selection(&text);
                Vec::new()
            }
            Event::CancelSelection => {
                self.selection = None;
                Vec::new()
            }
            Event::SaveDefinition(text) => self.save_definition(&text),
            Event::EditDefinition(key) => {
                if let Some(existing) = self.definitions.get(&key) {
                    self.selection = Some(SelectionDraft {
                        phrase: existing.phrase.clone(),
                        draft: existing.definition.clone(),
                        error: None,
                    });
                }
                Vec::new()
            }
            Event::RemoveDefinition(key) => {
                if !self.definitions.remove(&key) {
                    return Vec::new();
                }
                self.refresh_status();
                vec![self.persist_effect()]
            }
            Event::FindDefinition(key) => {
                if let Some(phrase) = self.definitions.get(&key).map(|d| d.phrase.clone()) {
                    self.run_search(&phrase);
                }
                Vec::new()
            }
        }
    }

    fn replace_sources(&mut self, outcome: LoadOutcome) {
        let LoadOutcome { sources, manifest } = outcome;
        self.sources = sources;
        self.index = ParagraphIndex::build(&self.sources);
        let still_present = self
            .active_source
            .as_deref()
            .is_some_and(|id| self.sources.iter().any(|source| source.id == id));
        if !still_present {
            self.active_source = self.sources.first().map(|source| source.id.clone());
        }
        if let Some(term) = self.search.as_ref().map(|s| s.term.clone()) {
            self.run_search(&term);
        }
        match manifest {
            ManifestStatus::Empty | ManifestStatus::Unavailable => {
                self.status = STATUS_NO_SOURCES.to_string();
            }
            ManifestStatus::Listed(_) => self.refresh_status(),
        }
    }

    fn run_search(&mut self, query: &str) {
        let term = query.trim();
        if term.is_empty() {
            self.search = None;
            return;
        }
        let outcome = search::search(&self.index, term);
        self.search = Some(ActiveSearch {
            term: term.to_string(),
            outcome,
        });
    }

    fn open_result(&mut self, position: usize) -> Vec<Effect> {
        let Some(hit) = self
            .search
            .as_ref()
            .and_then(|s| s.outcome.displayed().get(position))
        else {
            return Vec::new();
        };
        let source_id = hit.source_id.clone();
        let dom_id = hit.dom_id.clone();
        self.active_source = Some(source_id);
        vec![Effect::Spotlight(dom_id)]
    }

    fn begin_selection(&mut self, text: &str) {
        let phrase = collapse_whitespace(text);
        let length = phrase.chars().count();
        if !(MIN_SELECTION_CHARS..=MAX_SELECTION_CHARS).contains(&length) {
            self.selection = None;
            return;
        }
        let draft = self
            .definitions
            .find(&phrase)
            .map(|existing| existing.definition.clone())
            .unwrap_or_default();
        self.selection = Some(SelectionDraft {
            phrase,
            draft,
            error: None,
        });
    }

    fn save_definition(&mut self, text: &str) -> Vec<Effect> {
        let Some(selection) = self.selection.as_mut() else {
            return Vec::new();
        };
        let definition = text.trim();
        if definition.is_empty() {
            selection.draft = text.to_string();
            selection.error = Some(EMPTY_DEFINITION_ERROR.to_string());
            return Vec::new();
        }
        let phrase = selection.phrase.clone();
        let outcome = self.definitions.save(&phrase, definition, now_millis());
        debug!(?outcome, phrase = %phrase, "definition saved");
        self.selection = None;
        self.refresh_status();
        self.run_search(&phrase);
        vec![self.persist_effect()]
    }

    fn persist_effect(&self) -> Effect {
        Effect::PersistDefinitions(self.definitions.as_slice().to_vec())
    }

    fn refresh_status(&mut self) {
        let sources = self.sources.len();
        let definitions = self.definitions.len();
        self.status = format!(
            "{sources} {} loaded. {definitions} {} saved locally.",
            plural(sources, "source", "sources"),
            plural(definitions, "definition", "definitions"),
        );
    }
}

pub(crate) fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Section;

    fn cat_source() -> Source {
        Source {
            id: "data/a.json".into(),
            title: "A".into(),
            sections: vec![Section {
                heading: "Ch1".into(),
                paragraphs: vec!["the cat sat on the mat".into()],
            }],
        }
    }

    fn loaded(sources: Vec<Source>) -> AppState {
        let mut state = AppState::new();
        let listed = sources.len();
        state.apply(Event::SourcesLoaded(LoadOutcome {
            sources,
            manifest: ManifestStatus::Listed(listed),
        }));
        state
    }

    fn second_source() -> Source {
        Source {
            id: "data/b.json".into(),
            title: "B".into(),
            sections: vec![Section {
                heading: String::new(),
                paragraphs: vec!["a dog and a cat".into()],
            }],
        }
    }

    #[test]
    fn loading_selects_first_source_and_reports_status() {
        let mut state = AppState::new();
        state.apply(Event::LoadStarted);
        assert_eq!(state.status(), STATUS_LOADING);
        let state = loaded(vec![cat_source()]);
        assert_eq!(state.active_source_id(), Some("data/a.json"));
        assert_eq!(state.index().len(), 1);
        assert_eq!(state.status(), "1 source loaded. 0 definitions saved locally.");
    }

    #[test]
    fn empty_manifest_clears_sources_without_panicking() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::SourcesLoaded(LoadOutcome::empty(ManifestStatus::Empty)));
        assert!(state.sources().is_empty());
        assert!(state.index().is_empty());
        assert_eq!(state.active_source_id(), None);
        assert_eq!(state.status(), STATUS_NO_SOURCES);
    }

    #[test]
    fn reload_keeps_active_source_when_still_present() {
        let mut state = loaded(vec![cat_source(), second_source()]);
        state.apply(Event::SelectSource("data/b.json".into()));
        state.apply(Event::SourcesLoaded(LoadOutcome {
            sources: vec![second_source(), cat_source()],
            manifest: ManifestStatus::Listed(2),
        }));
        assert_eq!(state.active_source_id(), Some("data/b.json"));
        state.apply(Event::SourcesLoaded(LoadOutcome {
            sources: vec![cat_source()],
            manifest: ManifestStatus::Listed(2),
        }));
        assert_eq!(state.active_source_id(), Some("data/a.json"));
    }

    #[test]
    fn unknown_source_selection_is_ignored() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::SelectSource("nope".into()));
        assert_eq!(state.active_source_id(), Some("data/a.json"));
    }

    #[test]
    fn search_and_blank_search_clears() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::Search("  the ".into()));
        let active = state.search().unwrap();
        assert_eq!(active.term, "the");
        assert_eq!(active.outcome.total_hits, 2);
        assert_eq!(active.outcome.paragraph_count(), 1);
        state.apply(Event::Search("   ".into()));
        assert!(state.search().is_none());
    }

    #[test]
    fn reload_reruns_active_search() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::Search("cat".into()));
        state.apply(Event::SourcesLoaded(LoadOutcome {
            sources: vec![cat_source(), second_source()],
            manifest: ManifestStatus::Listed(2),
        }));
        assert_eq!(state.search().unwrap().outcome.total_hits, 2);
    }

    #[test]
    fn opening_a_result_selects_its_source_and_spotlights() {
        let mut state = loaded(vec![cat_source(), second_source()]);
        state.apply(Event::Search("dog".into()));
        let effects = state.apply(Event::OpenResult(0));
        assert_eq!(effects, vec![Effect::Spotlight("p-s1-0-0".into())]);
        assert_eq!(state.active_source_id(), Some("data/b.json"));
        assert!(state.apply(Event::OpenResult(9)).is_empty());
    }

    #[test]
    fn selection_length_is_bounded() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::BeginSelection("x".into()));
        assert!(state.selection().is_none());
        state.apply(Event::BeginSelection("y".repeat(161)));
        assert!(state.selection().is_none());
        state.apply(Event::BeginSelection("  the \n cat ".into()));
        assert_eq!(state.selection().unwrap().phrase, "the cat");
    }

    #[test]
    fn empty_definition_is_rejected_without_mutation() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::BeginSelection("cat".into()));
        let effects = state.apply(Event::SaveDefinition("   ".into()));
        assert!(effects.is_empty());
        assert!(state.definitions().is_empty());
        assert_eq!(
            state.selection().unwrap().error.as_deref(),
            Some(EMPTY_DEFINITION_ERROR)
        );
    }

    #[test]
    fn saving_persists_closes_panel_and_searches_phrase() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::BeginSelection(" Cat ".into()));
        let effects = state.apply(Event::SaveDefinition("a feline".into()));
        assert_eq!(state.definitions().len(), 1);
        assert_eq!(state.definitions().as_slice()[0].key, "cat");
        assert!(matches!(&effects[..], [Effect::PersistDefinitions(defs)] if defs.len() == 1));
        assert!(state.selection().is_none());
        assert_eq!(state.search_term(), "Cat");
        assert_eq!(state.status(), "1 source loaded. 1 definition saved locally.");

        state.apply(Event::BeginSelection("cat".into()));
        assert_eq!(state.selection().unwrap().draft, "a feline");
        state.apply(Event::SaveDefinition("small feline".into()));
        assert_eq!(state.definitions().len(), 1);
        assert_eq!(state.definitions().as_slice()[0].definition, "small feline");
    }

    #[test]
    fn edit_remove_and_find_by_key() {
        let mut state = loaded(vec![cat_source()]);
        state.apply(Event::BeginSelection("mat".into()));
        state.apply(Event::SaveDefinition("a rug".into()));
        state.apply(Event::ClearSearch);

        state.apply(Event::EditDefinition("mat".into()));
        assert_eq!(state.selection().unwrap().draft, "a rug");
        state.apply(Event::CancelSelection);

        state.apply(Event::FindDefinition("mat".into()));
        assert_eq!(state.search().unwrap().outcome.total_hits, 1);

        let effects = state.apply(Event::RemoveDefinition("mat".into()));
        assert_eq!(effects, vec![Effect::PersistDefinitions(Vec::new())]);
        assert!(state.apply(Event::RemoveDefinition("mat".into())).is_empty());
    }

    #[test]
    fn jump_to_switches_source() {
        let mut state = loaded(vec![cat_source(), second_source()]);
        let effects = state.apply(Event::JumpTo("p-s1-0-0".into()));
        assert_eq!(effects, vec![Effect::Spotlight("p-s1-0-0".into())]);
        assert_eq!(state.active_source_id(), Some("data/b.json"));
        assert!(state.apply(Event::JumpTo("p-s9-0-0".into())).is_empty());
    }
}

//! Pure projection of [`AppState`] into a renderable view tree.

use crate::index::{paragraph_dom_id, source_key};
use crate::search::{self, MAX_DISPLAY_RESULTS, Segment};
use crate::source::{Source, collapse_whitespace};
use crate::state::{AppState, plural};
use serde::Serialize;

const TOC_SNIPPET_CHARS: usize = 80;
const NO_SOURCE_TITLE: &str = "Select a source";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    pub status: String,
    pub sources: Vec<SourceItem>,
    pub header: HeaderView,
    pub toc: TocView,
    pub content: Vec<ContentSection>,
    pub search: SearchPanel,
    pub definitions: Vec<DefinitionCard>,
    pub selection: Option<SelectionPanel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceItem {
    pub id: String,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderView {
    pub title: String,
    pub meta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocView {
    pub meta: String,
    pub sections: Vec<TocSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocSection {
    pub label: String,
    /// First paragraph of the section; `None` disables the link.
    pub target: Option<String>,
    pub rows: Vec<TocRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocRow {
    pub number: String,
    pub snippet: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentSection {
    pub heading: Option<String>,
    pub paragraphs: Vec<ParagraphView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParagraphView {
    pub dom_id: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchPanel {
    pub term: String,
    pub summary: String,
    pub results: Vec<ResultItem>,
    /// Shown when a search ran and nothing matched.
    pub empty_message: Option<String>,
    /// Shown when results were cut to the display cap.
    pub more_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultItem {
    pub position: usize,
    pub source_id: String,
    pub dom_id: String,
    pub title: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionCard {
    pub key: String,
    pub phrase: String,
    pub definition: String,
    pub occurrences: usize,
    pub meta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionPanel {
    pub phrase: String,
    pub draft: String,
    pub error: Option<String>,
}

pub fn render(state: &AppState) -> PageView {
    let active = state.active_source();
    let term = state.search_term();
    PageView {
        status: state.status().to_string(),
        sources: render_source_list(state),
        header: render_header(active.map(|(_, source)| source)),
        toc: render_toc(active),
        content: active
            .map(|(position, source)| render_content(position, source, term))
            .unwrap_or_default(),
        search: render_search(state),
        definitions: render_definitions(state),
        selection: state.selection().map(|selection| SelectionPanel {
            phrase: selection.phrase.clone(),
            draft: selection.draft.clone(),
            error: selection.error.clone(),
        }),
    }
}

fn render_source_list(state: &AppState) -> Vec<SourceItem> {
    let active = state.active_source_id();
    state
        .sources()
        .iter()
        .map(|source| SourceItem {
            id: source.id.clone(),
            title: source.title.clone(),
            active: Some(source.id.as_str()) == active,
        })
        .collect()
}

fn render_header(source: Option<&Source>) -> HeaderView {
    match source {
        Some(source) => HeaderView {
            title: source.title.clone(),
            meta: format!(
                "{} sections, {} paragraphs",
                source.sections.len(),
                source.paragraph_count()
            ),
        },
        None => HeaderView {
            title: NO_SOURCE_TITLE.to_string(),
            meta: String::new(),
        },
    }
}

pub fn render_toc(active: Option<(usize, &Source)>) -> TocView {
    let Some((position, source)) = active else {
        return TocView {
            meta: NO_SOURCE_TITLE.to_string(),
            sections: Vec::new(),
        };
    };
    let key = source_key(position);
    let chapters = source.sections.len();
    let paragraphs = source.paragraph_count();
    let meta = format!(
        "{chapters} {}, {paragraphs} {}",
        plural(chapters, "chapter", "chapters"),
        plural(paragraphs, "paragraph", "paragraphs"),
    );
    let sections = source
        .sections
        .iter()
        .enumerate()
        .map(|(section_index, section)| {
            let label = if section.has_heading() {
                section.heading.clone()
            } else {
                format!("Chapter {}", section_index + 1)
            };
            let target = (!section.paragraphs.is_empty())
                .then(|| paragraph_dom_id(&key, section_index, 0));
            let rows = section
                .paragraphs
                .iter()
                .enumerate()
                .map(|(paragraph_index, text)| TocRow {
                    number: format!("{}.{}", section_index + 1, paragraph_index + 1),
                    snippet: toc_snippet(text),
                    target: paragraph_dom_id(&key, section_index, paragraph_index),
                })
                .collect();
            TocSection {
                label,
                target,
                rows,
            }
        })
        .collect();
    TocView { meta, sections }
}

pub fn render_content(position: usize, source: &Source, term: &str) -> Vec<ContentSection> {
    let key = source_key(position);
    source
        .sections
        .iter()
        .enumerate()
        .map(|(section_index, section)| ContentSection {
            heading: section.has_heading().then(|| section.heading.clone()),
            paragraphs: section
                .paragraphs
                .iter()
                .enumerate()
                .map(|(paragraph_index, text)| ParagraphView {
                    dom_id: paragraph_dom_id(&key, section_index, paragraph_index),
                    segments: search::highlight(text, term),
                })
                .collect(),
        })
        .collect()
}

fn render_search(state: &AppState) -> SearchPanel {
    let Some(active) = state.search() else {
        return SearchPanel {
            term: String::new(),
            summary: "Search across all sources.".to_string(),
            results: Vec::new(),
            empty_message: None,
            more_note: None,
        };
    };
    let outcome = &active.outcome;
    let hits = outcome.total_hits;
    let paragraphs = outcome.paragraph_count();
    let summary = format!(
        "{hits} {} in {paragraphs} {}.",
        plural(hits, "hit", "hits"),
        plural(paragraphs, "paragraph", "paragraphs"),
    );
    let results = outcome
        .displayed()
        .iter()
        .enumerate()
        .map(|(position, hit)| ResultItem {
            position,
            source_id: hit.source_id.clone(),
            dom_id: hit.dom_id.clone(),
            title: result_title(&hit.source_title, &hit.heading, hit.count),
            segments: search::highlight(&hit.snippet, &active.term),
        })
        .collect();
    SearchPanel {
        term: active.term.clone(),
        summary,
        results,
        empty_message: outcome
            .results
            .is_empty()
            .then(|| "No matches found.".to_string()),
        more_note: outcome
            .truncated()
            .then(|| format!("Showing first {MAX_DISPLAY_RESULTS} matches.")),
    }
}

pub fn result_title(source_title: &str, heading: &str, count: usize) -> String {
    if heading.is_empty() {
        format!("{source_title} ({count})")
    } else {
        format!("{source_title} - {heading} ({count})")
    }
}

fn render_definitions(state: &AppState) -> Vec<DefinitionCard> {
    state
        .definitions()
        .sorted()
        .into_iter()
        .map(|definition| {
            let occurrences = search::count_across(state.index(), &definition.phrase);
            DefinitionCard {
                key: definition.key.clone(),
                phrase: definition.phrase.clone(),
                definition: definition.definition.clone(),
                occurrences,
                meta: format!(
                    "{occurrences} {} found",
                    plural(occurrences, "instance", "instances")
                ),
            }
        })
        .collect()
}

fn toc_snippet(text: &str) -> String {
    let clean = collapse_whitespace(text);
    if clean.chars().count() <= TOC_SNIPPET_CHARS {
        return clean;
    }
    let head: String = clean.chars().take(TOC_SNIPPET_CHARS).collect();
    format!("{}...", head.trim_end())
}

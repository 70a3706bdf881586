//! Case-insensitive substring search over the paragraph index.
//!
//! Matching folds text and query one character at a time with
//! [`char::to_lowercase`] and scans the folded text left to right, skipping
//! past each match, so overlapping matches are never counted twice. Folded
//! offsets are mapped back onto the original text, which keeps snippets and
//! highlights on character boundaries even when lowercasing changes a
//! character's byte length.

use crate::index::{ParagraphIndex, ParagraphRecord};
use serde::Serialize;
use std::ops::Range;

/// Characters kept on each side of the first match in a snippet.
pub const SNIPPET_CONTEXT_CHARS: usize = 60;
/// Length of the preview used when a paragraph has no match at all.
pub const SNIPPET_FALLBACK_CHARS: usize = 140;
/// Results beyond this many are counted but not displayed.
pub const MAX_DISPLAY_RESULTS: usize = 200;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub source_id: String,
    pub source_title: String,
    pub heading: String,
    pub dom_id: String,
    pub section_index: usize,
    pub paragraph_index: usize,
    pub count: usize,
    pub snippet: String,
}

impl SearchHit {
    fn from_record(record: &ParagraphRecord, count: usize, snippet: String) -> Self {
        Self {
            source_id: record.source_id.clone(),
            source_title: record.source_title.clone(),
            heading: record.heading.clone(),
            dom_id: record.dom_id.clone(),
            section_index: record.section_index,
            paragraph_index: record.paragraph_index,
            count,
            snippet,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

impl SearchOutcome {
    /// Number of paragraphs with at least one hit.
    pub fn paragraph_count(&self) -> usize {
        self.results.len()
    }

    /// The results that are shown; totals still cover everything.
    pub fn displayed(&self) -> &[SearchHit] {
        let end = self.results.len().min(MAX_DISPLAY_RESULTS);
        &self.results[..end]
    }

    pub fn truncated(&self) -> bool {
        self.results.len() > MAX_DISPLAY_RESULTS
    }
}

/// A run of text that either matched the query or did not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    pub hit: bool,
}

impl Segment {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            hit: false,
        }
    }
}

/// Runs `query` against every paragraph, in index order.
pub fn search(index: &ParagraphIndex, query: &str) -> SearchOutcome {
    let needle = fold_query(query);
    let mut results = Vec::new();
    let mut total_hits = 0usize;
    if !needle.is_empty() {
        for record in index.records() {
            let folded = FoldedText::new(&record.text);
            let count = folded.count(&needle);
            if count == 0 {
                continue;
            }
            total_hits += count;
            let snippet = snippet_around(&record.text, folded.first_match(&needle));
            results.push(SearchHit::from_record(record, count, snippet));
        }
    }
    SearchOutcome {
        query: query.to_string(),
        total_hits,
        results,
    }
}

/// Non-overlapping, case-insensitive occurrences of `query` in `text`.
pub fn count_occurrences(text: &str, query: &str) -> usize {
    let needle = fold_query(query);
    if needle.is_empty() {
        return 0;
    }
    FoldedText::new(text).count(&needle)
}

/// Total occurrences of `phrase` across the whole index.
pub fn count_across(index: &ParagraphIndex, phrase: &str) -> usize {
    let needle = fold_query(phrase);
    if needle.is_empty() {
        return 0;
    }
    index
        .records()
        .iter()
        .map(|record| FoldedText::new(&record.text).count(&needle))
        .sum()
}

/// A window of [`SNIPPET_CONTEXT_CHARS`] around the first match, with `...`
/// marking each side that was cut.
pub fn make_snippet(text: &str, query: &str) -> String {
    let needle = fold_query(query);
    let first = if needle.is_empty() {
        None
    } else {
        FoldedText::new(text).first_match(&needle)
    };
    snippet_around(text, first)
}

/// Splits `text` into plain and matching segments.
pub fn highlight(text: &str, query: &str) -> Vec<Segment> {
    if text.is_empty() {
        return Vec::new();
    }
    let needle = fold_query(query);
    if needle.is_empty() {
        return vec![Segment::plain(text)];
    }
    let mut segments = Vec::new();
    let mut cursor = 0usize;
    for range in FoldedText::new(text).matches(&needle) {
        if range.start > cursor {
            segments.push(Segment::plain(&text[cursor..range.start]));
        }
        segments.push(Segment {
            text: text[range.clone()].to_string(),
            hit: true,
        });
        cursor = range.end;
    }
    if cursor < text.len() {
        segments.push(Segment::plain(&text[cursor..]));
    }
    segments
}

fn fold_query(query: &str) -> String {
    query.chars().flat_map(char::to_lowercase).collect()
}

fn snippet_around(text: &str, first: Option<Range<usize>>) -> String {
    let Some(range) = first else {
        return text.chars().take(SNIPPET_FALLBACK_CHARS).collect();
    };
    let total = text.chars().count();
    let match_start = text[..range.start].chars().count();
    let match_end = match_start + text[range].chars().count();
    let start = match_start.saturating_sub(SNIPPET_CONTEXT_CHARS);
    let end = (match_end + SNIPPET_CONTEXT_CHARS).min(total);

    let window = &text[char_to_byte(text, start)..char_to_byte(text, end)];
    let mut snippet = String::with_capacity(window.len() + 2 * ELLIPSIS.len());
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.push_str(window.trim());
    if end < total {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

fn char_to_byte(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

/// Lowercased copy of a text with a map back to the original offsets.
struct FoldedText<'a> {
    original: &'a str,
    folded: String,
    // (offset in `folded`, offset in `original`) for the start of every char.
    starts: Vec<(usize, usize)>,
}

impl<'a> FoldedText<'a> {
    fn new(original: &'a str) -> Self {
        let mut folded = String::with_capacity(original.len());
        let mut starts = Vec::with_capacity(original.len());
        for (offset, ch) in original.char_indices() {
            starts.push((folded.len(), offset));
            folded.extend(ch.to_lowercase());
        }
        Self {
            original,
            folded,
            starts,
        }
    }

    fn count(&self, needle: &str) -> usize {
        self.folded.matches(needle).count()
    }

    fn first_match(&self, needle: &str) -> Option<Range<usize>> {
        self.matches(needle).next()
    }

    fn matches<'s>(&'s self, needle: &'s str) -> impl Iterator<Item = Range<usize>> + 's {
        self.folded
            .match_indices(needle)
            .map(move |(start, matched)| {
                self.original_start(start)..self.original_end(start + matched.len())
            })
    }

    fn original_start(&self, folded: usize) -> usize {
        let idx = self.starts.partition_point(|(start, _)| *start <= folded);
        self.starts[idx.saturating_sub(1)].1
    }

    // A match may end inside a char whose lowercase form is longer than one
    // char; round up to the end of that char.
    fn original_end(&self, folded: usize) -> usize {
        let idx = self.starts.partition_point(|(start, _)| *start < folded);
        self.starts
            .get(idx)
            .map(|(_, original)| *original)
            .unwrap_or(self.original.len())
    }
}

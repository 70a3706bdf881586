use crate::source::Source;
use serde::Serialize;

/// One searchable paragraph plus the position it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParagraphRecord {
    pub source_id: String,
    pub source_key: String,
    pub source_title: String,
    pub heading: String,
    pub text: String,
    pub section_index: usize,
    pub paragraph_index: usize,
    pub dom_id: String,
}

/// Every paragraph of every source, flattened in source → section →
/// paragraph order. Only ever built from scratch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParagraphIndex {
    records: Vec<ParagraphRecord>,
}

impl ParagraphIndex {
    pub fn build(sources: &[Source]) -> Self {
        let capacity = sources.iter().map(Source::paragraph_count).sum();
        let mut records = Vec::with_capacity(capacity);
        for (position, source) in sources.iter().enumerate() {
            let source_key = source_key(position);
            for (section_index, section) in source.sections.iter().enumerate() {
                for (paragraph_index, text) in section.paragraphs.iter().enumerate() {
                    records.push(ParagraphRecord {
                        source_id: source.id.clone(),
                        source_key: source_key.clone(),
                        source_title: source.title.clone(),
                        heading: section.heading.clone(),
                        text: text.clone(),
                        section_index,
                        paragraph_index,
                        dom_id: paragraph_dom_id(&source_key, section_index, paragraph_index),
                    });
                }
            }
        }
        Self { records }
    }

    pub fn records(&self) -> &[ParagraphRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, dom_id: &str) -> Option<&ParagraphRecord> {
        self.records.iter().find(|record| record.dom_id == dom_id)
    }
}

/// Positional key of a loaded source, e.g. `s0`.
pub fn source_key(position: usize) -> String {
    format!("s{position}")
}

pub fn paragraph_dom_id(source_key: &str, section_index: usize, paragraph_index: usize) -> String {
    format!("p-{source_key}-{section_index}-{paragraph_index}")
}

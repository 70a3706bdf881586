use serde::{Deserialize, Deserializer, Serialize};

/// A loaded document. Identity is the manifest path it was fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub sections: Vec<Section>,
}

impl Source {
    pub fn paragraph_count(&self) -> usize {
        self.sections
            .iter()
            .map(|section| section.paragraphs.len())
            .sum()
    }
}

/// A heading plus its ordered paragraphs. An absent heading is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub paragraphs: Vec<String>,
}

impl Section {
    pub fn has_heading(&self) -> bool {
        !self.heading.is_empty()
    }
}

/// Wire format of the manifest endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub files: Vec<String>,
}

/// Wire format of a single source document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSource {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "sections_or_empty")]
    pub sections: Vec<RawSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSection {
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub verbatim_text: Option<String>,
}

// A `sections` value that is not an array means "no sections", and an
// element that is not a section object is skipped, not a broken file.
fn sections_or_empty<'de, D>(deserializer: D) -> Result<Vec<RawSection>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawSection>(item).ok())
        .collect())
}

impl RawSource {
    /// Normalizes a fetched document into a [`Source`] identified by `file`.
    pub fn into_source(self, file: &str) -> Source {
        let title = self
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| file.to_string());
        Source {
            id: file.to_string(),
            title,
            sections: normalize_sections(self.sections),
        }
    }
}

/// Trims headings, splits verbatim text into paragraphs and drops sections
/// that end up with neither.
pub fn normalize_sections(raw: Vec<RawSection>) -> Vec<Section> {
    raw.into_iter()
        .map(|section| {
            let heading = section.heading.unwrap_or_default().trim().to_string();
            let paragraphs = split_paragraphs(section.verbatim_text.as_deref().unwrap_or(""));
            Section {
                heading,
                paragraphs,
            }
        })
        .filter(|section| section.has_heading() || !section.paragraphs.is_empty())
        .collect()
}

/// Splits text on runs of two or more newlines and collapses all whitespace
/// inside each chunk to single spaces. Empty chunks are dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    let mut paragraphs = Vec::new();
    let mut chunk_start = 0usize;
    let bytes = text.as_bytes();
    let mut idx = 0usize;
    while idx < bytes.len() {
        if bytes[idx] == b'\n' {
            let run_start = idx;
            while idx < bytes.len() && bytes[idx] == b'\n' {
                idx += 1;
            }
            if idx - run_start >= 2 {
                push_collapsed(&mut paragraphs, &text[chunk_start..run_start]);
                chunk_start = idx;
            }
        } else {
            idx += 1;
        }
    }
    push_collapsed(&mut paragraphs, &text[chunk_start..]);
    paragraphs
}

fn push_collapsed(out: &mut Vec<String>, chunk: &str) {
    let collapsed = collapse_whitespace(chunk);
    if !collapsed.is_empty() {
        out.push(collapsed);
    }
}

/// Replaces every whitespace run with a single space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

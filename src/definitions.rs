use crate::error::StoreError;
use crate::source::collapse_whitespace;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Storage key holding the serialized definition list.
pub const STORAGE_KEY: &str = "study_guide_definitions";

/// A user-authored meaning for a phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub phrase: String,
    pub definition: String,
    pub key: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

/// Lookup key for a phrase: trimmed, whitespace collapsed, lowercased.
pub fn normalize_phrase(phrase: &str) -> String {
    collapse_whitespace(phrase).to_lowercase()
}

/// In-memory definition list; at most one entry per normalized key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionBook {
    entries: Vec<Definition>,
}

impl DefinitionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates the entry for `phrase`. An existing entry keeps its
    /// key and creation time but takes the new display phrase and text.
    pub fn save(&mut self, phrase: &str, definition: &str, now: u64) -> SaveOutcome {
        let key = normalize_phrase(phrase);
        if let Some(existing) = self.entries.iter_mut().find(|entry| entry.key == key) {
            existing.phrase = phrase.to_string();
            existing.definition = definition.to_string();
            existing.updated_at = Some(now);
            return SaveOutcome::Updated;
        }
        self.entries.push(Definition {
            phrase: phrase.to_string(),
            definition: definition.to_string(),
            key,
            created_at: now,
            updated_at: None,
        });
        SaveOutcome::Created
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.key != key);
        self.entries.len() != before
    }

    pub fn get(&self, key: &str) -> Option<&Definition> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    /// Looks a phrase up by its normalized key.
    pub fn find(&self, phrase: &str) -> Option<&Definition> {
        self.get(&normalize_phrase(phrase))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Definition] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by phrase, ignoring case first.
    pub fn sorted(&self) -> Vec<&Definition> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|a, b| {
            a.phrase
                .to_lowercase()
                .cmp(&b.phrase.to_lowercase())
                .then_with(|| a.phrase.cmp(&b.phrase))
        });
        sorted
    }

    /// Parses a stored blob. Anything that is not a JSON array yields an
    /// empty book; entries without a phrase or definition are skipped.
    pub fn from_blob(raw: &str) -> Self {
        let items = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(_) => {
                warn!("stored definitions are not a list; ignoring");
                return Self::default();
            }
            Err(err) => {
                warn!(error = %err, "stored definitions are malformed; ignoring");
                return Self::default();
            }
        };
        let now = now_millis();
        let entries = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<StoredDefinition>(item).ok())
            .filter_map(|stored| stored.into_definition(now))
            .collect();
        Self { entries }
    }
}

impl From<Vec<Definition>> for DefinitionBook {
    fn from(entries: Vec<Definition>) -> Self {
        Self { entries }
    }
}

// Lenient mirror of `Definition` used only when reading stored data.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDefinition {
    phrase: Option<String>,
    definition: Option<String>,
    key: Option<String>,
    created_at: Option<u64>,
    updated_at: Option<u64>,
}

impl StoredDefinition {
    fn into_definition(self, now: u64) -> Option<Definition> {
        let phrase = self.phrase.filter(|p| !p.is_empty())?;
        let definition = self.definition.filter(|d| !d.is_empty())?;
        let key = self
            .key
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| normalize_phrase(&phrase));
        Some(Definition {
            phrase,
            definition,
            key,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at,
        })
    }
}

/// Persists the whole definition list as one blob under [`STORAGE_KEY`].
#[derive(Clone)]
pub struct DefinitionStore {
    backend: Arc<dyn KeyValueStore>,
}

impl DefinitionStore {
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self::with_backend(Arc::new(FileStore::new(dir)))
    }

    pub fn ephemeral() -> Self {
        Self::with_backend(Arc::new(MemoryStore::new()))
    }

    pub fn with_backend(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Reads the stored list. Never fails; unreadable data means no definitions.
    pub fn load(&self) -> DefinitionBook {
        match self.backend.get(STORAGE_KEY) {
            Ok(Some(raw)) => DefinitionBook::from_blob(&raw),
            Ok(None) => DefinitionBook::default(),
            Err(err) => {
                warn!(error = %err, "failed to read stored definitions");
                DefinitionBook::default()
            }
        }
    }

    /// Replaces the stored list with `definitions`.
    pub fn persist(&self, definitions: &[Definition]) -> Result<(), StoreError> {
        let blob = serde_json::to_string(definitions)?;
        self.backend.set(STORAGE_KEY, &blob)?;
        debug!(count = definitions.len(), "definitions persisted");
        Ok(())
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

//! Study guide reader: loads sectioned text sources, searches them, and keeps
//! personal term definitions alongside.

pub mod cache;
pub mod config;
pub mod controller;
pub mod definitions;
pub mod error;
pub mod fetch;
pub mod index;
pub mod loader;
pub mod search;
pub mod source;
pub mod state;
pub mod storage;
pub mod view;
#[cfg(feature = "web")]
pub mod web;

pub use cache::OfflineCache;
pub use config::AppConfig;
pub use controller::{Controller, DataFetcher, loader_from_config};
pub use definitions::{Definition, DefinitionBook, DefinitionStore, normalize_phrase};
pub use error::{CacheError, FetchError, StoreError};
pub use fetch::{FetchRequest, Fetcher, FsFetcher, Method};
pub use index::{ParagraphIndex, ParagraphRecord};
pub use loader::{LoadOutcome, ManifestStatus, SourceLoader};
pub use search::{SearchHit, SearchOutcome, Segment, count_occurrences, make_snippet, search};
pub use source::{Section, Source, split_paragraphs};
pub use state::{AppState, Effect, Event};
pub use view::PageView;

//! Persistent storage: backend plus namespaced sub-stores
//!
//! Everything Eridanus keeps lives under one root directory, addressed
//! through the flat keyed [`Backend`]. Higher layers reserve namespaces:
//!
//! ```text
//! content/<idhash>          raw bytes, write-once
//! thumbnail/<idhash>        150×150 PNG, generated on demand
//! metadata/<idhash>         comma-separated tag list
//! classes/<name>            yaml URL class
//! parsers/<name>            yaml parser
//! web_cache/<md5(url)>      length-prefixed request+response
//! web_result/<md5(url)>     yaml parse results
//! config/cookies.json       cookie jar snapshot
//! ```

mod backend;
mod classes;
mod content;
mod fetcher;
mod parsers;
mod tags;

pub use backend::Backend;
pub use classes::ClassesStorage;
pub use content::ContentStorage;
pub use fetcher::{CachedResponse, FetcherStorage};
pub use parsers::ParsersStorage;
pub use tags::TagStorage;

pub(crate) use content::panic_message;

use crate::defaults;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {key}")]
    NotFound { key: String },

    #[error("invalid key: {key:?}")]
    InvalidKey { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt cache entry: {0}")]
    CorruptCache(String),

    #[error("image error: {0}")]
    Image(String),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The assembled store: backend plus all namespaced sub-stores
pub struct Storage {
    backend: Arc<Backend>,
    classes: ClassesStorage,
    parsers: ParsersStorage,
    tags: TagStorage,
    content: ContentStorage,
    fetcher: FetcherStorage,
}

impl Storage {
    /// Opens the store rooted at `root`, seeding the built-in rule set when
    /// the classes or parsers namespaces are empty.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Storage> {
        let backend = Arc::new(Backend::open(root.as_ref())?);
        let classes = ClassesStorage::open(backend.clone(), &defaults::default_classes())?;
        let parsers = ParsersStorage::open(backend.clone(), &defaults::default_parsers())?;
        let tags = TagStorage::new(backend.clone());
        let content = ContentStorage::new(backend.clone());
        let fetcher = FetcherStorage::open(backend.clone())?;
        Ok(Storage {
            backend,
            classes,
            parsers,
            tags,
            content,
            fetcher,
        })
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn classes(&self) -> &ClassesStorage {
        &self.classes
    }

    pub fn parsers(&self) -> &ParsersStorage {
        &self.parsers
    }

    pub fn tags(&self) -> &TagStorage {
        &self.tags
    }

    pub fn content(&self) -> &ContentStorage {
        &self.content
    }

    pub fn fetcher(&self) -> &FetcherStorage {
        &self.fetcher
    }

    /// Persists in-memory state (the cookie jar) and runs shutdown hooks.
    pub fn close(&self) -> StorageResult<()> {
        self.backend.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_seeds_default_rules() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        assert!(!storage.classes().names().is_empty());
        assert!(!storage.parsers().names().is_empty());
        // The seeds were persisted as individual namespace keys.
        assert!(!storage.backend().keys("classes").unwrap().is_empty());
        assert!(!storage.backend().keys("parsers").unwrap().is_empty());
    }

    #[test]
    fn test_reopen_preserves_rules() {
        let dir = TempDir::new().unwrap();
        let first_names = {
            let storage = Storage::open(dir.path()).unwrap();
            storage.close().unwrap();
            storage.classes().names()
        };
        let storage = Storage::open(dir.path()).unwrap();
        assert_eq!(storage.classes().names(), first_names);
    }
}

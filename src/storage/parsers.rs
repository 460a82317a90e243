//! Persistent store of parser definitions
//!
//! One yaml blob per parser under `parsers/<name>`, cached in memory the
//! same way as [`ClassesStorage`](super::classes::ClassesStorage).

use super::backend::Backend;
use super::{StorageError, StorageResult};
use crate::classifier::UrlClass;
use crate::parser::Parser;
use std::sync::{Arc, RwLock};

const NAMESPACE: &str = "parsers";

pub struct ParsersStorage {
    backend: Arc<Backend>,
    parsers: RwLock<Vec<Parser>>,
}

impl ParsersStorage {
    /// Loads parsers from the backend, seeding the provided defaults when
    /// the namespace is empty.
    pub fn open(backend: Arc<Backend>, seed: &[Parser]) -> StorageResult<ParsersStorage> {
        let store = ParsersStorage {
            backend,
            parsers: RwLock::new(Vec::new()),
        };
        let keys = store.backend.keys(NAMESPACE)?;
        if keys.is_empty() {
            for parser in seed {
                store.put(parser.clone())?;
            }
        } else {
            let mut parsers = Vec::with_capacity(keys.len());
            for key in keys {
                let blob = store.backend.get(&key)?;
                parsers.push(serde_yaml::from_slice::<Parser>(&blob)?);
            }
            *store.parsers.write().expect("parsers poisoned") = parsers;
        }
        Ok(store)
    }

    pub fn names(&self) -> Vec<String> {
        self.parsers
            .read()
            .expect("parsers poisoned")
            .iter()
            .map(|parser| parser.name.clone())
            .collect()
    }

    /// Adds or replaces a parser, persisting it immediately.
    pub fn put(&self, parser: Parser) -> StorageResult<()> {
        let blob = serde_yaml::to_string(&parser)?;
        self.backend
            .set(&format!("{}/{}", NAMESPACE, parser.name), blob.as_bytes())?;
        let mut parsers = self.parsers.write().expect("parsers poisoned");
        match parsers.iter_mut().find(|existing| existing.name == parser.name) {
            Some(existing) => *existing = parser,
            None => parsers.push(parser),
        }
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.parsers
            .read()
            .expect("parsers poisoned")
            .iter()
            .any(|parser| parser.name == name)
    }

    pub fn get(&self, name: &str) -> StorageResult<Parser> {
        self.parsers
            .read()
            .expect("parsers poisoned")
            .iter()
            .find(|parser| parser.name == name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: format!("{}/{}", NAMESPACE, name),
            })
    }

    pub fn get_all(&self) -> Vec<Parser> {
        self.parsers.read().expect("parsers poisoned").clone()
    }

    /// Parsers applicable to the given class: output type permitted by the
    /// class kind, and at least one example URL classifying under it.
    pub fn for_class(&self, class: &UrlClass) -> Vec<Parser> {
        self.parsers
            .read()
            .expect("parsers poisoned")
            .iter()
            .filter(|parser| parser.applies_to(class))
            .cloned()
            .collect()
    }
}

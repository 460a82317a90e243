//! Persistent store of URL classification rules
//!
//! Each rule is kept as an individual yaml blob under `classes/<name>`.
//! The full rule set is read-mostly: it is loaded into memory at open and
//! mutated through write-through `put`, so classification never touches
//! disk.

use super::backend::Backend;
use super::{StorageError, StorageResult};
use crate::classifier::{self, UrlClass};
use crate::ClassifyError;
use std::sync::{Arc, RwLock};
use url::Url;

const NAMESPACE: &str = "classes";

pub struct ClassesStorage {
    backend: Arc<Backend>,
    rules: RwLock<Vec<UrlClass>>,
}

impl ClassesStorage {
    /// Loads the rule set from the backend. If the namespace is empty the
    /// provided seed rules are written in.
    pub fn open(backend: Arc<Backend>, seed: &[UrlClass]) -> StorageResult<ClassesStorage> {
        let store = ClassesStorage {
            backend,
            rules: RwLock::new(Vec::new()),
        };
        let keys = store.backend.keys(NAMESPACE)?;
        if keys.is_empty() {
            for rule in seed {
                store.put(rule.clone())?;
            }
        } else {
            let mut rules = Vec::with_capacity(keys.len());
            for key in keys {
                let blob = store.backend.get(&key)?;
                let rule: UrlClass = serde_yaml::from_slice(&blob)?;
                rules.push(rule);
            }
            *store.rules.write().expect("classes poisoned") = rules;
        }
        Ok(store)
    }

    /// Names of all stored rules.
    pub fn names(&self) -> Vec<String> {
        self.rules
            .read()
            .expect("classes poisoned")
            .iter()
            .map(|rule| rule.name.clone())
            .collect()
    }

    /// Adds or replaces a rule, persisting it immediately.
    pub fn put(&self, rule: UrlClass) -> StorageResult<()> {
        let blob = serde_yaml::to_string(&rule)?;
        self.backend
            .set(&format!("{}/{}", NAMESPACE, rule.name), blob.as_bytes())?;
        let mut rules = self.rules.write().expect("classes poisoned");
        match rules.iter_mut().find(|existing| existing.name == rule.name) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.rules
            .read()
            .expect("classes poisoned")
            .iter()
            .any(|rule| rule.name == name)
    }

    /// Returns the named rule.
    pub fn get(&self, name: &str) -> StorageResult<UrlClass> {
        self.rules
            .read()
            .expect("classes poisoned")
            .iter()
            .find(|rule| rule.name == name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: format!("{}/{}", NAMESPACE, name),
            })
    }

    /// Returns the whole rule set in storage order.
    pub fn get_all(&self) -> Vec<UrlClass> {
        self.rules.read().expect("classes poisoned").clone()
    }

    /// Returns the highest-priority rule matching the URL along with its
    /// normalised form.
    pub fn for_url(&self, url: &Url) -> Result<(UrlClass, Url), ClassifyError> {
        let rules = self.rules.read().expect("classes poisoned");
        classifier::classify(url, &rules).map(|(rule, normalised)| (rule.clone(), normalised))
    }
}

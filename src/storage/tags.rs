//! Tag sets keyed by content hash
//!
//! Tags live under `metadata/<idhash>` as a comma-joined list, stored
//! duplicate-free and sorted.

use super::backend::Backend;
use super::StorageResult;
use crate::idhash::IdHash;
use std::collections::BTreeSet;
use std::sync::Arc;

const NAMESPACE: &str = "metadata";

pub struct TagStorage {
    backend: Arc<Backend>,
}

impl TagStorage {
    pub fn new(backend: Arc<Backend>) -> TagStorage {
        TagStorage { backend }
    }

    fn key(hash: &IdHash) -> String {
        format!("{}/{}", NAMESPACE, hash)
    }

    /// Tags for the given hash; an absent entry reads as no tags.
    pub fn get(&self, hash: &IdHash) -> StorageResult<Vec<String>> {
        if !self.backend.has(&Self::key(hash)) {
            return Ok(Vec::new());
        }
        let blob = self.backend.get(&Self::key(hash))?;
        let text = String::from_utf8_lossy(&blob);
        let set: BTreeSet<String> = text
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();
        Ok(set.into_iter().collect())
    }

    /// Stores the tag set for the hash, deduplicated and sorted.
    pub fn set(&self, hash: &IdHash, tags: &[String]) -> StorageResult<()> {
        let set: BTreeSet<&str> = tags
            .iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .collect();
        let joined = set.into_iter().collect::<Vec<_>>().join(",");
        self.backend.set(&Self::key(hash), joined.as_bytes())
    }

    pub fn has(&self, hash: &IdHash) -> bool {
        self.backend.has(&Self::key(hash))
    }

    /// All hashes that have tag entries.
    pub fn keys(&self) -> StorageResult<Vec<IdHash>> {
        Ok(self
            .backend
            .keys(NAMESPACE)?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&format!("{}/", NAMESPACE))
                    .map(IdHash::new)
            })
            .collect())
    }

    /// Hashes whose tag sets contain every queried tag.
    pub fn find_by_tags(&self, query: &[String]) -> StorageResult<Vec<IdHash>> {
        let mut found = Vec::new();
        for hash in self.keys()? {
            let tags = self.get(&hash)?;
            if query.iter().all(|wanted| tags.iter().any(|t| t == wanted)) {
                found.push(hash);
            }
        }
        Ok(found)
    }
}

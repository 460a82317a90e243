//! Content-addressed blob storage with on-demand thumbnails
//!
//! Blobs are write-once under `content/<idhash>`. Thumbnails are 150×150
//! nearest-neighbour PNG renderings generated lazily and cached under
//! `thumbnail/<idhash>`. Image decoding happens behind a panic guard so a
//! hostile blob surfaces as an error instead of tearing down the caller.

use super::backend::Backend;
use super::{StorageError, StorageResult};
use crate::idhash::{id_hash, IdHash};
use image::imageops::FilterType;
use std::io::Cursor;
use std::sync::Arc;

const CONTENT_NAMESPACE: &str = "content";
const THUMBNAIL_NAMESPACE: &str = "thumbnail";
const THUMBNAIL_SIZE: u32 = 150;

pub struct ContentStorage {
    backend: Arc<Backend>,
}

impl ContentStorage {
    pub fn new(backend: Arc<Backend>) -> ContentStorage {
        ContentStorage { backend }
    }

    fn content_key(hash: &IdHash) -> String {
        format!("{}/{}", CONTENT_NAMESPACE, hash)
    }

    fn thumbnail_key(hash: &IdHash) -> String {
        format!("{}/{}", THUMBNAIL_NAMESPACE, hash)
    }

    /// Stores content bytes, returning the identity hash.
    ///
    /// Identical bytes land in the same slot, so re-storing is a no-op
    /// beyond the hash computation.
    pub fn set(&self, content: &[u8]) -> StorageResult<IdHash> {
        let hash = id_hash(content);
        let key = Self::content_key(&hash);
        if !self.backend.has(&key) {
            self.backend.set(&key, content)?;
        }
        Ok(hash)
    }

    pub fn get(&self, hash: &IdHash) -> StorageResult<Vec<u8>> {
        self.backend.get(&Self::content_key(hash))
    }

    pub fn has(&self, hash: &IdHash) -> bool {
        self.backend.has(&Self::content_key(hash))
    }

    pub fn keys(&self) -> StorageResult<Vec<IdHash>> {
        Ok(self
            .backend
            .keys(CONTENT_NAMESPACE)?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&format!("{}/", CONTENT_NAMESPACE))
                    .map(IdHash::new)
            })
            .collect())
    }

    /// Returns the cached thumbnail, generating it on first access.
    pub fn thumbnail(&self, hash: &IdHash) -> StorageResult<Vec<u8>> {
        let key = Self::thumbnail_key(hash);
        if !self.backend.has(&key) {
            let content = self.get(hash)?;
            let rendered = render_thumbnail(&content)?;
            self.backend.set(&key, &rendered)?;
        }
        self.backend.get(&key)
    }
}

/// Decodes, resizes, and PNG-encodes behind a panic guard.
fn render_thumbnail(content: &[u8]) -> StorageResult<Vec<u8>> {
    let content = content.to_vec();
    std::panic::catch_unwind(move || -> StorageResult<Vec<u8>> {
        let img = image::load_from_memory(&content)
            .map_err(|err| StorageError::Image(err.to_string()))?;
        let thumb = img.resize_exact(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Nearest);
        let mut buf = Vec::new();
        thumb
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|err| StorageError::Image(err.to_string()))?;
        Ok(buf)
    })
    .unwrap_or_else(|panic| {
        Err(StorageError::Image(format!(
            "thumbnail rendering panicked: {}",
            panic_message(&panic)
        )))
    })
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ContentStorage) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(Backend::open(dir.path()).unwrap());
        (dir, ContentStorage::new(backend))
    }

    /// A 2×2 RGB PNG built in memory so the fixture stays in the test.
    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_fn(2, 2, |x, y| image::Rgb([x as u8 * 100, y as u8 * 100, 0]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_set_returns_id_hash() {
        let (_dir, content) = store();
        let hash = content.set(b"aaaa").unwrap();
        assert_eq!(
            hash.as_str(),
            "61be55a8e2f6b4e172338bddf184d6dbee29c98853e0a0485ecee7f27b9af0b4"
        );
        assert!(content.has(&hash));
        assert_eq!(content.get(&hash).unwrap(), b"aaaa");
    }

    #[test]
    fn test_set_is_idempotent() {
        let (_dir, content) = store();
        let first = content.set(b"payload").unwrap();
        let second = content.set(b"payload").unwrap();
        assert_eq!(first, second);
        assert_eq!(content.keys().unwrap().len(), 1);
    }

    #[test]
    fn test_keys_lists_hashes() {
        let (_dir, content) = store();
        let a = content.set(b"one").unwrap();
        let b = content.set(b"two").unwrap();
        let keys = content.keys().unwrap();
        assert!(keys.contains(&a));
        assert!(keys.contains(&b));
    }

    #[test]
    fn test_thumbnail_generated_and_cached() {
        let (_dir, content) = store();
        let hash = content.set(&tiny_png()).unwrap();
        let thumb = content.thumbnail(&hash).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.width(), 150);
        assert_eq!(decoded.height(), 150);
        // Second call serves the cached rendering.
        assert_eq!(content.thumbnail(&hash).unwrap(), thumb);
    }

    #[test]
    fn test_thumbnail_of_non_image_is_error() {
        let (_dir, content) = store();
        let hash = content.set(b"definitely not an image").unwrap();
        assert!(matches!(
            content.thumbnail(&hash),
            Err(StorageError::Image(_))
        ));
    }

    #[test]
    fn test_thumbnail_of_missing_content_is_not_found() {
        let (_dir, content) = store();
        let hash = crate::idhash::id_hash(b"never stored");
        assert!(matches!(
            content.thumbnail(&hash),
            Err(StorageError::NotFound { .. })
        ));
    }
}

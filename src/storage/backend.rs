//! Keyed byte-stream store on the local filesystem
//!
//! Keys are path-style strings separated by `/`; the last segment becomes
//! the file name and the rest the directory path under the store root.
//! Writes are atomic at the file level (temp file + rename), so concurrent
//! writes to distinct keys never interfere.

use super::{StorageError, StorageResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A shutdown callback registered by a higher layer
pub type CloseHook = Box<dyn FnOnce() -> StorageResult<()> + Send>;

/// Flat keyed blob store rooted at a directory
pub struct Backend {
    root: PathBuf,
    on_close: Mutex<Vec<CloseHook>>,
}

impl Backend {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Backend> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Backend {
            root,
            on_close: Mutex::new(Vec::new()),
        })
    }

    /// The filesystem location of the store, for collaborators that need
    /// OS-native access.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.split('/').any(|segment| {
                segment.is_empty() || segment == "." || segment == ".."
            })
        {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }

    /// Lists all keys under the given prefix, sorted.
    pub fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.key_path(prefix.trim_end_matches('/'))?
        };
        let mut keys = Vec::new();
        if dir.is_dir() {
            collect_keys(&self.root, &dir, &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }

    /// Reports whether data exists at the key.
    pub fn has(&self, key: &str) -> bool {
        self.key_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Stores data at the key, replacing any prior value.
    ///
    /// The write goes to a temporary sibling first and is renamed into
    /// place, so readers never observe a partial value.
    pub fn set(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        static WRITE_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = WRITE_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp.{}.{}", std::process::id(), seq));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Fetches the data stored at the key.
    pub fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the data stored at the key.
    pub fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Ingests a file from the local filesystem at the given key.
    ///
    /// With `move_file` the source is removed after import.
    pub fn import(&self, source: &Path, key: &str, move_file: bool) -> StorageResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if move_file {
            // Rename first; fall back to copy + remove across filesystems.
            if fs::rename(source, &path).is_err() {
                fs::copy(source, &path)?;
                fs::remove_file(source)?;
            }
        } else {
            fs::copy(source, &path)?;
        }
        Ok(())
    }

    /// Registers a callback to run when the store closes.
    pub fn register_on_close(&self, hook: CloseHook) {
        self.on_close.lock().expect("close hooks poisoned").push(hook);
    }

    /// Runs registered shutdown callbacks. Failures are logged; the first
    /// error is returned after all hooks have run.
    pub fn close(&self) -> StorageResult<()> {
        let hooks: Vec<CloseHook> = self
            .on_close
            .lock()
            .expect("close hooks poisoned")
            .drain(..)
            .collect();
        let mut first_err = None;
        for hook in hooks {
            if let Err(err) = hook() {
                tracing::error!("close hook failed: {}", err);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> StorageResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, Backend) {
        let dir = TempDir::new().unwrap();
        let be = Backend::open(dir.path()).unwrap();
        (dir, be)
    }

    #[test]
    fn test_set_get_round_trip() {
        let (_dir, be) = backend();
        be.set("content/abc", b"hello").unwrap();
        assert_eq!(be.get("content/abc").unwrap(), b"hello");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, be) = backend();
        assert!(matches!(
            be.get("content/missing"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_has() {
        let (_dir, be) = backend();
        assert!(!be.has("metadata/x"));
        be.set("metadata/x", b"tags").unwrap();
        assert!(be.has("metadata/x"));
    }

    #[test]
    fn test_delete() {
        let (_dir, be) = backend();
        be.set("web_cache/x", b"data").unwrap();
        be.delete("web_cache/x").unwrap();
        assert!(!be.has("web_cache/x"));
        assert!(matches!(
            be.delete("web_cache/x"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_keys_with_prefix() {
        let (_dir, be) = backend();
        be.set("classes/a", b"1").unwrap();
        be.set("classes/b", b"2").unwrap();
        be.set("parsers/c", b"3").unwrap();
        assert_eq!(be.keys("classes").unwrap(), vec!["classes/a", "classes/b"]);
        assert_eq!(be.keys("parsers").unwrap(), vec!["parsers/c"]);
        assert!(be.keys("thumbnail").unwrap().is_empty());
    }

    #[test]
    fn test_nested_keys() {
        let (_dir, be) = backend();
        be.set("config/cookies.json", b"[]").unwrap();
        assert_eq!(be.get("config/cookies.json").unwrap(), b"[]");
        assert_eq!(be.keys("config").unwrap(), vec!["config/cookies.json"]);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let (_dir, be) = backend();
        for key in ["", "a//b", "../escape", "a/./b"] {
            assert!(matches!(
                be.set(key, b"x"),
                Err(StorageError::InvalidKey { .. })
            ));
        }
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let (_dir, be) = backend();
        be.set("k/v", b"one").unwrap();
        be.set("k/v", b"two").unwrap();
        assert_eq!(be.get("k/v").unwrap(), b"two");
    }

    #[test]
    fn test_import_copy_and_move() {
        let (_dir, be) = backend();
        let src_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("file.bin");
        std::fs::write(&src, b"payload").unwrap();

        be.import(&src, "content/copied", false).unwrap();
        assert!(src.exists());
        assert_eq!(be.get("content/copied").unwrap(), b"payload");

        be.import(&src, "content/moved", true).unwrap();
        assert!(!src.exists());
        assert_eq!(be.get("content/moved").unwrap(), b"payload");
    }

    #[test]
    fn test_close_runs_hooks() {
        let (_dir, be) = backend();
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let hooked = flag.clone();
        be.register_on_close(Box::new(move || {
            hooked.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }));
        be.close().unwrap();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}

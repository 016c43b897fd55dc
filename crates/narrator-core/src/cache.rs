//! Resume checkpoints persisted per document.
//!
//! Files are stored under the cache directory using a hash of the document
//! key as the directory name to avoid filesystem issues. The format is a tiny
//! TOML file. A checkpoint also records a digest of the plain text it was
//! taken against, so a checkpoint never applies to an edited document.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Position saved at pause time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub char_base: usize,
    pub word_idx: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEntry {
    char_base: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    word_idx: Option<usize>,
    text_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn for_document(cache_dir: &Path, document_key: &str) -> Self {
        Self {
            path: hash_dir(cache_dir, document_key).join("checkpoint.toml"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint if present and taken against `plain_text`.
    pub fn load(&self, plain_text: &str) -> Option<Checkpoint> {
        let data = fs::read_to_string(&self.path).ok()?;
        let entry: CheckpointEntry = match toml::from_str(&data) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %self.path.display(), "Ignoring unreadable checkpoint: {err}");
                return None;
            }
        };
        if entry.text_digest != text_digest(plain_text) {
            debug!(path = %self.path.display(), "Checkpoint belongs to different text");
            return None;
        }
        Some(Checkpoint {
            char_base: entry.char_base,
            word_idx: entry.word_idx,
        })
    }

    /// Persist a checkpoint. Errors are logged and otherwise ignored so
    /// playback control never fails on disk problems.
    pub fn save(&self, checkpoint: Checkpoint, plain_text: &str) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), "Failed to create checkpoint dir: {err}");
                return;
            }
        }
        let entry = CheckpointEntry {
            char_base: checkpoint.char_base,
            word_idx: checkpoint.word_idx,
            text_digest: text_digest(plain_text),
        };
        match toml::to_string(&entry) {
            Ok(contents) => {
                if let Err(err) = fs::write(&self.path, contents) {
                    warn!(path = %self.path.display(), "Failed to write checkpoint: {err}");
                } else {
                    debug!(path = %self.path.display(), ?checkpoint, "Saved checkpoint");
                }
            }
            Err(err) => warn!("Failed to serialize checkpoint: {err}"),
        }
    }

    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Cleared checkpoint"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), "Failed to clear checkpoint: {err}"),
        }
    }
}

pub fn hash_dir(cache_dir: &Path, document_key: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(document_key.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    cache_dir.join(hash)
}

pub fn text_digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("narrator-{name}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn checkpoint_round_trips_for_same_text() {
        let dir = unique_temp_dir("cache-roundtrip");
        let store = CheckpointStore::for_document(&dir, "/books/one.txt");
        let checkpoint = Checkpoint {
            char_base: 1201,
            word_idx: Some(240),
        };

        store.save(checkpoint, "some plain text");

        assert_eq!(store.load("some plain text"), Some(checkpoint));
        assert_eq!(store.load("edited plain text"), None);
        store.clear();
        assert_eq!(store.load("some plain text"), None);
        store.clear();
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn documents_get_distinct_paths() {
        let dir = Path::new(DEFAULT_CACHE_DIR);
        let a = CheckpointStore::for_document(dir, "a.txt");
        let b = CheckpointStore::for_document(dir, "b.txt");
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir));
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = unique_temp_dir("cache-corrupt");
        let store = CheckpointStore::for_document(&dir, "c.txt");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not = [valid").unwrap();
        assert_eq!(store.load("anything"), None);
        let _ = fs::remove_dir_all(dir);
    }
}

use crate::error::{FlashcardError, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key holding the full local card collection.
pub const CARDS_KEY: &str = "flashcards_data";
/// Key holding the review-progress snapshot.
pub const PROGRESS_KEY: &str = "review_progress";
/// Key holding [`crate::config::AppSettings`].
pub const SETTINGS_KEY: &str = "settings";

/// Synchronous key-value persistence.
pub trait KeyValueStore: Send + Sync {
    fn save(&self, key: &str, value: &Value) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn clear(&self, key: &str) -> Result<()>;
}

pub fn save_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.save(key, &serde_json::to_value(value)?)
}

/// Load and decode `key`. A value that no longer decodes is treated as absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(value) = store.load(key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(e) => {
            warn!("Ignoring unreadable value under '{}': {}", key, e);
            Ok(None)
        }
    }
}

/// One pretty-printed JSON file per key inside a data directory.
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Storage { data_dir })
    }

    /// Platform data directory, e.g. `~/.local/share/flashdeck`.
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("flashdeck"))
            .ok_or_else(|| FlashcardError::Config("Failed to get app data directory".to_string()))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for Storage {
    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.key_path(key))?;

        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, value)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        match serde_json::from_reader(reader) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn clear(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, used by tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock().get(key).cloned())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Card;
    use serde_json::json;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path()).unwrap();

        storage.save("answer", &json!({"value": 42})).unwrap();
        assert_eq!(storage.load("answer").unwrap(), Some(json!({"value": 42})));
        assert!(temp_dir.path().join("answer.json").exists());
    }

    #[test]
    #[serial]
    fn test_file_store_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path()).unwrap();
        assert_eq!(storage.load(CARDS_KEY).unwrap(), None);
        storage.clear(CARDS_KEY).unwrap();
    }

    #[test]
    #[serial]
    fn test_file_store_clear() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path()).unwrap();
        storage.save(PROGRESS_KEY, &json!([1, 2, 3])).unwrap();
        storage.clear(PROGRESS_KEY).unwrap();
        assert_eq!(storage.load(PROGRESS_KEY).unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_corrupt_file_reads_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("flashcards_data.json"), "{not json").unwrap();
        assert_eq!(storage.load(CARDS_KEY).unwrap(), None);
    }

    #[test]
    fn test_typed_helpers() {
        let store = MemoryStore::new();
        let cards = vec![Card::new("Q", "A", None)];
        save_json(&store, CARDS_KEY, &cards).unwrap();

        let loaded: Vec<Card> = load_json(&store, CARDS_KEY).unwrap().unwrap();
        assert_eq!(loaded, cards);

        // Wrong shape is treated as absent
        store.save(CARDS_KEY, &json!("oops")).unwrap();
        let loaded: Option<Vec<Card>> = load_json(&store, CARDS_KEY).unwrap();
        assert!(loaded.is_none());
    }
}

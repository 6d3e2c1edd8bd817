use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

/// The SessionStorage trait abstracts the page-scoped key/value store the
/// credential is mirrored into (get, set, remove).
///
/// Calls are synchronous: the mirror is written inline with the in-memory
/// update and never awaited.
pub trait SessionStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove_item(&self, key: &str) -> Result<(), String>;
    /// Whether values survive a restart of the process.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// A volatile storage that lives as long as the value itself.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, String> {
        self.items
            .lock()
            .map_err(|_| "memory storage lock poisoned".to_string())
    }
}

impl SessionStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.items()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
        self.items()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), String> {
        self.items()?.remove(key);
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Storage backed by a single JSON object on disk.
///
/// The file is rewritten on every change; a missing file reads as empty.
pub struct FileStorage {
    path: PathBuf,
    // serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(format!("Failed to read {}: {}", self.path.display(), e)),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(format!("{} does not hold a JSON object", self.path.display())),
            Err(e) => Err(format!("Failed to parse {}: {}", self.path.display(), e)),
        }
    }

    fn write_all(&self, map: Map<String, Value>) -> Result<(), String> {
        let serialized = serde_json::to_string(&Value::Object(map))
            .map_err(|e| format!("Failed to serialize storage: {}", e))?;
        fs::write(&self.path, serialized)
            .map_err(|e| format!("Failed to write {}: {}", self.path.display(), e))
    }

    fn update(&self, apply: impl FnOnce(&mut Map<String, Value>)) -> Result<(), String> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| "file storage lock poisoned".to_string())?;
        let mut map = self.read_all()?;
        apply(&mut map);
        self.write_all(map)
    }
}

impl SessionStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self
            .read_all()?
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
        self.update(|map| {
            map.insert(key.to_string(), Value::from(value));
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), String> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

//! Narrow persistence and clock ports
//!
//! The core persists only two classes of keys (run timers and
//! one-shot UI dismissal flags), so the store surface is deliberately
//! tiny. Tests substitute the in-memory map and a manual clock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// A durable string key-value namespace
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn delete(&self, key: &str);
    fn list_by_prefix(&self, prefix: &str) -> Vec<(String, String)>;
}

/// Millisecond wall-clock port
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// System clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: Mutex<i64>,
}

impl ManualClock {
    pub fn new(ms: i64) -> Self {
        Self { ms: Mutex::new(ms) }
    }

    pub fn advance(&self, delta_ms: i64) {
        *self.ms.lock() += delta_ms;
    }

    pub fn set(&self, ms: i64) {
        *self.ms.lock() = ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        *self.ms.lock()
    }
}

/// In-memory store, used by tests and ephemeral hosts
#[derive(Default)]
pub struct MemoryKv {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.map.lock().insert(key.to_string(), value.to_string());
    }

    fn delete(&self, key: &str) {
        self.map.lock().remove(key);
    }

    fn list_by_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.map
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// File-backed store: a single JSON object persisted on every mutation.
/// Write failures are logged and swallowed; losing a timer entry is
/// recoverable, blocking the conversation is not.
pub struct FileKv {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileKv {
    /// Default data directory for parley state
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Open the default store file, creating the directory if needed
    pub fn open() -> std::io::Result<Self> {
        let dir = Self::data_dir();
        fs::create_dir_all(&dir)?;
        Self::open_at(dir.join("state.json"))
    }

    /// Open a store at a specific path
    pub fn open_at(path: PathBuf) -> std::io::Result<Self> {
        let map = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable state file {}: {}", path.display(), e);
                HashMap::new()
            })
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    fn persist(&self, map: &HashMap<String, String>) {
        let content = match serde_json::to_string_pretty(map) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to serialize state: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, content) {
            tracing::warn!("Failed to write state file {}: {}", self.path.display(), e);
        }
    }
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut map = self.map.lock();
        map.insert(key.to_string(), value.to_string());
        self.persist(&map);
    }

    fn delete(&self, key: &str) {
        let mut map = self.map.lock();
        if map.remove(key).is_some() {
            self.persist(&map);
        }
    }

    fn list_by_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.map
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

//! Keyed state behind the guardrails. `upsert` runs its closure while holding
//! the key's lock, so concurrent updates to one key serialize.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

pub const DUPLICATE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("state file {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

pub trait StoreEntry: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn is_stale(&self, now: DateTime<Utc>) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBudgetEntry {
    pub total: u64,
    pub day: NaiveDate,
}

impl StoreEntry for DailyBudgetEntry {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.day != now.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationQuotaEntry {
    pub count: u32,
    pub day: NaiveDate,
}

impl StoreEntry for CreationQuotaEntry {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.day != now.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentQuestionEntry {
    pub seen_at: DateTime<Utc>,
}

impl StoreEntry for RecentQuestionEntry {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.seen_at >= Duration::hours(DUPLICATE_WINDOW_HOURS)
    }
}

pub trait GuardrailStore<V: StoreEntry>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<V>, StoreError>;

    fn upsert(&self, key: &str, update: &mut dyn FnMut(Option<V>) -> V) -> Result<V, StoreError>;

    fn remove(&self, key: &str) -> Result<Option<V>, StoreError>;

    /// Missing keys count as stale.
    fn is_stale(&self, key: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.get(key)?.map_or(true, |v| v.is_stale(now)))
    }
}

/// Process-local store; entries live for the process lifetime.
pub struct InMemoryStore<V> {
    entries: DashMap<String, V>,
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: StoreEntry> GuardrailStore<V> for InMemoryStore<V> {
    fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn upsert(&self, key: &str, update: &mut dyn FnMut(Option<V>) -> V) -> Result<V, StoreError> {
        let next = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut slot) => {
                let next = update(Some(slot.get().clone()));
                slot.insert(next.clone());
                next
            }
            Entry::Vacant(slot) => {
                let next = update(None);
                slot.insert(next.clone());
                next
            }
        };
        Ok(next)
    }

    fn remove(&self, key: &str) -> Result<Option<V>, StoreError> {
        Ok(self.entries.remove(key).map(|(_, v)| v))
    }
}

/// JSON snapshot store: the whole map is rewritten (temp file + rename) on every upsert.
pub struct FileStore<V> {
    path: PathBuf,
    entries: Mutex<HashMap<String, V>>,
}

impl<V: StoreEntry> FileStore<V> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, V>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let body = serde_json::to_vec_pretty(entries).map_err(|e| StoreError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))
    }
}

impl<V: StoreEntry> GuardrailStore<V> for FileStore<V> {
    fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn upsert(&self, key: &str, update: &mut dyn FnMut(Option<V>) -> V) -> Result<V, StoreError> {
        let mut entries = self.entries.lock();
        let next = update(entries.get(key).cloned());
        let prev = entries.insert(key.to_owned(), next.clone());
        if let Err(e) = self.persist(&entries) {
            // keep memory and disk in agreement
            match prev {
                Some(p) => entries.insert(key.to_owned(), p),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(next)
    }

    fn remove(&self, key: &str) -> Result<Option<V>, StoreError> {
        let mut entries = self.entries.lock();
        let Some(prev) = entries.remove(key) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_owned(), prev);
            return Err(e);
        }
        Ok(Some(prev))
    }
}

fn io_err(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

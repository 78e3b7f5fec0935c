//! Capped, LRU-evicted store of recently used terminal sessions

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

/// Storage key holding the JSON array of records
pub const STORAGE_KEY: &str = "forge.terminal.sessions";

/// Most records kept; the least recently accessed are dropped first
pub const MAX_RECORDS: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode session records: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key/value persistence (`localStorage` in the browser)
pub trait Storage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory [`Storage`]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RefCell<HashMap<String, String>>,
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One remembered session; timestamps are milliseconds since the epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSessionRecord {
    pub session_id: String,
    pub session_name: String,
    /// Opaque UI layout state
    #[serde(default)]
    pub layout: Option<serde_json::Value>,
    #[serde(default)]
    pub project_root: Option<String>,
    pub created_at: u64,
    pub last_access: u64,
}

pub struct SessionStore<S: Storage> {
    storage: S,
}

impl<S: Storage> SessionStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// All records, most recently accessed first
    ///
    /// Unreadable stored data counts as an empty store.
    pub fn records(&self) -> Vec<StoredSessionRecord> {
        let raw = match self.storage.get_item(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Failed to read session records: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<StoredSessionRecord>>(&raw) {
            Ok(mut records) => {
                sort_by_recency(&mut records);
                records
            }
            Err(e) => {
                log::warn!("Discarding unreadable session records: {}", e);
                Vec::new()
            }
        }
    }

    /// Insert or replace the record with the same session id
    pub fn upsert(&self, record: StoredSessionRecord) -> Result<(), StoreError> {
        let mut records = self.records();
        records.retain(|r| r.session_id != record.session_id);
        records.push(record);
        self.save(records)
    }

    /// Mark a session as used; returns whether it was known
    pub fn touch(&self, session_id: &str, now: u64) -> Result<bool, StoreError> {
        let mut records = self.records();
        let Some(record) = records.iter_mut().find(|r| r.session_id == session_id) else {
            return Ok(false);
        };
        record.last_access = now;
        self.save(records)?;
        Ok(true)
    }

    /// Most recently accessed record with this name
    pub fn find_by_name(&self, session_name: &str) -> Option<StoredSessionRecord> {
        self.records()
            .into_iter()
            .find(|r| r.session_name == session_name)
    }

    pub fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut records = self.records();
        let before = records.len();
        records.retain(|r| r.session_id != session_id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(records)?;
        Ok(true)
    }

    fn save(&self, mut records: Vec<StoredSessionRecord>) -> Result<(), StoreError> {
        sort_by_recency(&mut records);
        records.truncate(MAX_RECORDS);
        let json = serde_json::to_string(&records)?;
        self.storage.set_item(STORAGE_KEY, &json)
    }
}

/// Decides which stored session a connect should reattach to
///
/// A client is bound to one session name. Connecting without a session id
/// reattaches to the most recent record under that name, unless the client
/// asked for a fresh session and has not been assigned one yet.
#[derive(Debug, Clone)]
pub struct SessionPicker {
    session_name: String,
    fresh: bool,
}

impl SessionPicker {
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            fresh: false,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Record to reattach to when connecting with `current` as the known id
    pub fn resume_target<S: Storage>(
        &self,
        store: &SessionStore<S>,
        current: Option<&str>,
    ) -> Option<StoredSessionRecord> {
        if current.is_some() || self.fresh {
            return None;
        }
        store.find_by_name(&self.session_name)
    }

    /// Switch to the most recent session stored under `session_name`
    pub fn restore<S: Storage>(
        &mut self,
        store: &SessionStore<S>,
        session_name: &str,
    ) -> Option<StoredSessionRecord> {
        let record = store.find_by_name(session_name)?;
        self.session_name = record.session_name.clone();
        self.fresh = false;
        Some(record)
    }

    /// Forget `current` so the next connect starts a new session
    pub fn start_fresh<S: Storage>(&mut self, store: &SessionStore<S>, current: Option<&str>) {
        if let Some(id) = current {
            if let Err(e) = store.remove(id) {
                log::warn!("Failed to forget session {}: {}", id, e);
            }
        }
        self.fresh = true;
    }

    /// The server assigned a session; later reconnects resume it again
    pub fn assigned(&mut self) {
        self.fresh = false;
    }
}

fn sort_by_recency(records: &mut [StoredSessionRecord]) {
    records.sort_by(|a, b| b.last_access.cmp(&a.last_access));
}

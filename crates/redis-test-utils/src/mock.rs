//! In-memory [`KeyValueStore`] for unit tests.
//!
//! `MemoryStore` follows Redis semantics closely enough for client-level
//! tests: databases are independent, `SET` overwrites any value, hash
//! commands against a string key fail with a `WRONGTYPE` error, and an emptied
//! hash disappears. It also counts calls and can be told to fail every
//! command, which makes error propagation easy to exercise.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{ErrorKind, RedisError, RedisResult};

use crate::store::KeyValueStore;

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug)]
enum Entry {
    String(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: Mutex<HashMap<i64, HashMap<String, Entry>>>,
    failure: Mutex<Option<(ErrorKind, &'static str)>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following command fail with the given error.
    pub fn fail_with(&self, kind: ErrorKind, description: &'static str) {
        *self.failure.lock() = Some((kind, description));
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Number of commands received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of keys currently held in `db`.
    pub fn len(&self, db: i64) -> usize {
        self.databases.lock().get(&db).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, db: i64) -> bool {
        self.len(db) == 0
    }

    fn begin(&self) -> RedisResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.failure.lock() {
            Some(failure) => Err(RedisError::from(failure)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, db: i64, key: &str) -> RedisResult<Option<String>> {
        self.begin()?;
        let databases = self.databases.lock();
        match databases.get(&db).and_then(|entries| entries.get(key)) {
            None => Ok(None),
            Some(Entry::String(value)) => Ok(Some(value.clone())),
            Some(Entry::Hash(_)) => Err(RedisError::from((ErrorKind::TypeError, WRONG_TYPE))),
        }
    }

    async fn set(&self, db: i64, key: &str, value: &str) -> RedisResult<()> {
        self.begin()?;
        self.databases
            .lock()
            .entry(db)
            .or_default()
            .insert(key.to_string(), Entry::String(value.to_string()));
        Ok(())
    }

    async fn delete(&self, db: i64, key: &str) -> RedisResult<()> {
        self.begin()?;
        if let Some(entries) = self.databases.lock().get_mut(&db) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn hash_get(&self, db: i64, key: &str, field: &str) -> RedisResult<Option<String>> {
        self.begin()?;
        let databases = self.databases.lock();
        match databases.get(&db).and_then(|entries| entries.get(key)) {
            None => Ok(None),
            Some(Entry::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Entry::String(_)) => Err(RedisError::from((ErrorKind::TypeError, WRONG_TYPE))),
        }
    }

    async fn hash_set(&self, db: i64, key: &str, field: &str, value: &str) -> RedisResult<()> {
        self.begin()?;
        let mut databases = self.databases.lock();
        let entry = databases
            .entry(db)
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry {
            Entry::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Entry::String(_) => Err(RedisError::from((ErrorKind::TypeError, WRONG_TYPE))),
        }
    }

    async fn hash_delete(&self, db: i64, key: &str, field: &str) -> RedisResult<()> {
        self.begin()?;
        let mut databases = self.databases.lock();
        let Some(entries) = databases.get_mut(&db) else {
            return Ok(());
        };
        let emptied = match entries.get_mut(key) {
            None => false,
            Some(Entry::Hash(fields)) => {
                fields.remove(field);
                fields.is_empty()
            }
            Some(Entry::String(_)) => {
                return Err(RedisError::from((ErrorKind::TypeError, WRONG_TYPE)))
            }
        };
        if emptied {
            entries.remove(key);
        }
        Ok(())
    }

    async fn flush(&self, db: i64) -> RedisResult<()> {
        self.begin()?;
        self.databases.lock().remove(&db);
        Ok(())
    }
}

//! Typed in-memory keyspace.
//!
//! Two value tables (strings and lists) plus an expiration table, each
//! behind its own mutex. A key lives in at most one value table at any
//! instant; operations that need to inspect both tables acquire the locks
//! in the fixed order strings, lists, expirations. No lock is ever held
//! across an await point.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum KeyspaceError {
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("value is not an integer or out of range")]
    NotAnInteger,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}

#[derive(Debug, Default)]
pub struct Keyspace {
    strings: Mutex<HashMap<String, String>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    expirations: Mutex<HashMap<String, i64>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily erases `key` from every table if its deadline has passed.
    ///
    /// Idempotent: racing callers may both observe the expired entry, and
    /// whichever loses simply erases nothing.
    fn purge_if_expired(&self, key: &str) {
        let mut strings = self.strings.lock();
        let mut lists = self.lists.lock();
        let mut expirations = self.expirations.lock();

        if let Some(&deadline) = expirations.get(key) {
            if deadline <= now_ms() {
                strings.remove(key);
                lists.remove(key);
                expirations.remove(key);
            }
        }
    }

    /// Stores a string value, erasing any list previously held under `key`
    /// and clearing its expiration.
    pub fn set(&self, key: String, value: String) {
        let mut strings = self.strings.lock();
        let mut lists = self.lists.lock();
        let mut expirations = self.expirations.lock();

        lists.remove(&key);
        expirations.remove(&key);
        strings.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, KeyspaceError> {
        self.purge_if_expired(key);

        let strings = self.strings.lock();
        if let Some(value) = strings.get(key) {
            return Ok(Some(value.clone()));
        }
        drop(strings);

        if self.lists.lock().contains_key(key) {
            return Err(KeyspaceError::WrongType);
        }

        Ok(None)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.purge_if_expired(key);

        self.strings.lock().contains_key(key) || self.lists.lock().contains_key(key)
    }

    /// Erases `key` from every table. Returns whether a value was removed.
    /// A key whose deadline already passed counts as missing.
    pub fn del(&self, key: &str) -> bool {
        self.purge_if_expired(key);

        let mut strings = self.strings.lock();
        let mut lists = self.lists.lock();
        let mut expirations = self.expirations.lock();

        let removed = strings.remove(key).is_some() | lists.remove(key).is_some();
        expirations.remove(key);

        removed
    }

    pub fn incr(&self, key: &str) -> Result<i64, KeyspaceError> {
        self.step(key, 1)
    }

    pub fn decr(&self, key: &str) -> Result<i64, KeyspaceError> {
        self.step(key, -1)
    }

    fn step(&self, key: &str, delta: i64) -> Result<i64, KeyspaceError> {
        self.purge_if_expired(key);

        let mut strings = self.strings.lock();
        let lists = self.lists.lock();

        if lists.contains_key(key) {
            return Err(KeyspaceError::WrongType);
        }
        drop(lists);

        let Some(stored) = strings.get_mut(key) else {
            strings.insert(key.to_string(), delta.to_string());
            return Ok(delta);
        };

        let current = stored
            .parse::<i64>()
            .map_err(|_| KeyspaceError::NotAnInteger)?;
        let stepped = current
            .checked_add(delta)
            .ok_or(KeyspaceError::NotAnInteger)?;
        *stored = stepped.to_string();

        Ok(stepped)
    }

    /// Pushes `values` onto the list at `key`, creating it if absent.
    ///
    /// With `front` set, each value is prepended in argument order, so the
    /// final order is reversed relative to the argument list. Returns the
    /// new list length.
    pub fn push(&self, key: &str, values: &[String], front: bool) -> Result<usize, KeyspaceError> {
        self.purge_if_expired(key);

        let strings = self.strings.lock();
        if strings.contains_key(key) {
            return Err(KeyspaceError::WrongType);
        }
        let mut lists = self.lists.lock();
        drop(strings);

        let list = lists.entry(key.to_string()).or_default();

        for value in values {
            if front {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }

        Ok(list.len())
    }

    /// Returns the inclusive range `[start, stop]` of the list at `key`.
    ///
    /// Negative indices count from the tail (`-1` is the last element);
    /// both endpoints are clamped into bounds after translation. A missing
    /// key or an empty effective range yields an empty vector.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KeyspaceError> {
        self.purge_if_expired(key);

        let strings = self.strings.lock();
        if strings.contains_key(key) {
            return Err(KeyspaceError::WrongType);
        }
        let lists = self.lists.lock();
        drop(strings);

        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };

        let Some((start, stop)) = translate_range(list.len(), start, stop) else {
            return Ok(Vec::new());
        };

        Ok(list.range(start..=stop).cloned().collect())
    }

    /// Length of the value at `key`: string byte count or list element
    /// count, 0 when missing.
    pub fn size_of(&self, key: &str) -> usize {
        self.purge_if_expired(key);

        if let Some(value) = self.strings.lock().get(key) {
            return value.len();
        }

        self.lists.lock().get(key).map_or(0, |list| list.len())
    }

    /// Sets an absolute expiration deadline (epoch milliseconds) on an
    /// existing key. Returns whether the key existed.
    pub fn expire_at(&self, key: &str, deadline_ms: i64) -> bool {
        self.purge_if_expired(key);

        let strings = self.strings.lock();
        let lists = self.lists.lock();
        let mut expirations = self.expirations.lock();

        if !strings.contains_key(key) && !lists.contains_key(key) {
            return false;
        }

        expirations.insert(key.to_string(), deadline_ms);
        true
    }

    /// Clears any expiration on `key`. Returns whether one was set.
    pub fn persist(&self, key: &str) -> bool {
        self.expirations.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut strings = self.strings.lock();
        let mut lists = self.lists.lock();
        let mut expirations = self.expirations.lock();

        strings.clear();
        lists.clear();
        expirations.clear();
    }

    /// Consistent copy of the whole store for snapshot encoding.
    ///
    /// Expirations are reported as epoch milliseconds, -1 when absent.
    #[allow(clippy::type_complexity)]
    pub fn snapshot_entries(
        &self,
    ) -> (Vec<(String, String, i64)>, Vec<(String, Vec<String>, i64)>) {
        let strings = self.strings.lock();
        let lists = self.lists.lock();
        let expirations = self.expirations.lock();

        let string_entries = strings
            .iter()
            .map(|(key, value)| {
                let deadline = expirations.get(key).copied().unwrap_or(-1);
                (key.clone(), value.clone(), deadline)
            })
            .collect();

        let list_entries = lists
            .iter()
            .map(|(key, list)| {
                let deadline = expirations.get(key).copied().unwrap_or(-1);
                (key.clone(), list.iter().cloned().collect(), deadline)
            })
            .collect();

        (string_entries, list_entries)
    }

    /// Snapshot-loader entry points: insert without the overwrite semantics
    /// of the client-facing operations.
    pub fn restore_string(&self, key: String, value: String, deadline_ms: i64) {
        let mut strings = self.strings.lock();
        let mut expirations = self.expirations.lock();

        if deadline_ms >= 0 {
            expirations.insert(key.clone(), deadline_ms);
        }
        strings.insert(key, value);
    }

    pub fn restore_list(&self, key: String, elements: Vec<String>, deadline_ms: i64) {
        let mut lists = self.lists.lock();
        let mut expirations = self.expirations.lock();

        if deadline_ms >= 0 {
            expirations.insert(key.clone(), deadline_ms);
        }
        lists.insert(key, elements.into());
    }
}

/// Translates possibly-negative range endpoints into clamped list indices.
///
/// Returns `None` when the effective range is empty.
fn translate_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }

    let len = len as i64;

    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };

    start = start.max(0);
    stop = stop.min(len - 1);

    if start >= len || start > stop {
        return None;
    }

    Some((start as usize, stop as usize))
}

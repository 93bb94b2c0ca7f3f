// SPDX-License-Identifier: Apache-2.0

//! The process-wide cache service (§4.9): a mutex-guarded key/value map with per-entry TTLs,
//! serviced by an expiry thread that dispatches [`crate::event::Event::CacheExpiry`] events.

use crate::event::Event;
use conduit_channel::mpmc::Sender;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Entry {
    data: Value,
    metadata: Value,
    expiry: Instant,
    ttl: Duration,
    destination: Sender<Event>,
}

struct State {
    entries: HashMap<String, Entry>,
}

/// Process-wide cache with per-key TTL expiry.
///
/// Mirrors [`crate::timer::TimerManager`]'s shape: a mutex-guarded map plus a condition variable
/// the expiry thread waits on, woken either by a new/updated entry or by its own nearest-deadline
/// timeout. Unlike the timer heap, entries are looked up and updated by key, so a flat map
/// (scanned for the nearest deadline) fits better than a binary heap — updates on a hot key are
/// far more common here than in the one-shot-dominated timer case.
pub struct CacheService {
    state: Arc<(Mutex<State>, Condvar)>,
    stopped: Arc<AtomicBool>,
    expiry_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheService {
    /// Builds a new cache and starts its expiry thread.
    #[must_use]
    pub fn new() -> Self {
        let state = Arc::new((
            Mutex::new(State {
                entries: HashMap::new(),
            }),
            Condvar::new(),
        ));
        let stopped = Arc::new(AtomicBool::new(false));

        let expiry_thread = {
            let state = state.clone();
            let stopped = stopped.clone();
            std::thread::Builder::new()
                .name("conduit-cache-expiry".to_owned())
                .spawn(move || expiry_loop(state, stopped))
                .expect("failed to spawn cache expiry thread")
        };

        Self {
            state,
            stopped,
            expiry_thread: Mutex::new(Some(expiry_thread)),
        }
    }

    /// Inserts a fresh key with `ttl` starting now, or updates an existing one by merging `data`
    /// and `metadata` into the prior entry and leaving its expiry clock untouched, per §4.9:
    /// "Updating an existing key merges new value/metadata with prior expiry unless explicitly
    /// overridden." Use [`CacheService::put_overwrite`] for the explicit-override path that
    /// replaces the entry outright and resets its expiry.
    pub fn put(&self, key: impl Into<String>, data: Value, metadata: Value, ttl: Duration, destination: Sender<Event>) {
        let key = key.into();
        let (lock, cvar) = &*self.state;
        {
            let mut state = lock.lock();
            match state.entries.get_mut(&key) {
                Some(entry) => {
                    entry.data = merge_value(std::mem::replace(&mut entry.data, Value::Null), data);
                    entry.metadata = merge_value(std::mem::replace(&mut entry.metadata, Value::Null), metadata);
                    entry.destination = destination;
                }
                None => {
                    let _ = state.entries.insert(
                        key,
                        Entry {
                            data,
                            metadata,
                            expiry: Instant::now() + ttl,
                            ttl,
                            destination,
                        },
                    );
                }
            }
        }
        cvar.notify_one();
    }

    /// Inserts or replaces a key outright, resetting the expiry clock from now. The explicit-
    /// override counterpart to [`CacheService::put`]'s default merge-and-keep-prior-expiry
    /// behavior.
    pub fn put_overwrite(&self, key: impl Into<String>, data: Value, metadata: Value, ttl: Duration, destination: Sender<Event>) {
        let (lock, cvar) = &*self.state;
        {
            let mut state = lock.lock();
            let _ = state.entries.insert(
                key.into(),
                Entry {
                    data,
                    metadata,
                    expiry: Instant::now() + ttl,
                    ttl,
                    destination,
                },
            );
        }
        cvar.notify_one();
    }

    /// Reads a key's current data without affecting its expiry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let (lock, _) = &*self.state;
        lock.lock().entries.get(key).map(|e| e.data.clone())
    }

    /// Refreshes a key's TTL from now, leaving its data and metadata untouched. A no-op if the
    /// key is absent.
    pub fn touch(&self, key: &str) {
        let (lock, cvar) = &*self.state;
        {
            let mut state = lock.lock();
            if let Some(entry) = state.entries.get_mut(key) {
                entry.expiry = Instant::now() + entry.ttl;
            }
        }
        cvar.notify_one();
    }

    /// Removes a key immediately, without dispatching a `CacheExpiry` event.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let (lock, cvar) = &*self.state;
        let removed = lock.lock().entries.remove(key).map(|e| e.data);
        cvar.notify_one();
        removed
    }

    /// Stops the expiry thread and joins it. Idempotent.
    pub fn shutdown(&self) {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        self.state.1.notify_all();
        if let Some(handle) = self.expiry_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shallow-merges `new` onto `old`: matching object keys are overwritten by `new`'s, keys only
/// in `old` are kept. Either side being a non-object (scalar, array, or absent) makes a merge
/// meaningless, so `new` wins outright in that case.
fn merge_value(old: Value, new: Value) -> Value {
    match (old, new) {
        (Value::Object(mut old_map), Value::Object(new_map)) => {
            old_map.extend(new_map);
            Value::Object(old_map)
        }
        (_, new) => new,
    }
}

fn expiry_loop(state: Arc<(Mutex<State>, Condvar)>, stopped: Arc<AtomicBool>) {
    let (lock, cvar) = &*state;
    loop {
        if stopped.load(AtomicOrdering::SeqCst) {
            return;
        }
        let mut guard = lock.lock();
        let now = Instant::now();

        let next_expiry = guard.entries.values().map(|e| e.expiry).min();

        let Some(next_expiry) = next_expiry else {
            let _ = cvar.wait_for(&mut guard, Duration::from_secs(1));
            continue;
        };

        if next_expiry > now {
            let _ = cvar.wait_for(&mut guard, next_expiry - now);
            continue;
        }

        let due_keys: Vec<String> = guard
            .entries
            .iter()
            .filter(|(_, e)| e.expiry <= Instant::now())
            .map(|(k, _)| k.clone())
            .collect();

        for key in due_keys {
            if let Some(entry) = guard.entries.remove(&key) {
                let event = Event::CacheExpiry {
                    key,
                    metadata: entry.metadata,
                    expired_data: entry.data,
                };
                let _ = entry.destination.send_timeout(event, Duration::from_millis(100));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_then_get_returns_stored_data() {
        let cache = CacheService::new();
        let (tx, _rx) = conduit_channel::mpmc::bounded(4);
        cache.put("k", json!("v"), json!({}), Duration::from_secs(60), tx);
        assert_eq!(cache.get("k"), Some(json!("v")));
        cache.shutdown();
    }

    #[test]
    fn entry_expires_and_dispatches_event() {
        let cache = CacheService::new();
        let (tx, rx) = conduit_channel::mpmc::bounded(4);
        cache.put("k", json!("v"), json!({"m": 1}), Duration::from_millis(10), tx);
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::CacheExpiry { key, metadata, expired_data } => {
                assert_eq!(key, "k");
                assert_eq!(metadata, json!({"m": 1}));
                assert_eq!(expired_data, json!("v"));
            }
            other => panic!("expected CacheExpiry, got {other:?}"),
        }
        assert_eq!(cache.get("k"), None);
        cache.shutdown();
    }

    #[test]
    fn touch_resets_expiry() {
        let cache = CacheService::new();
        let (tx, rx) = conduit_channel::mpmc::bounded(4);
        cache.put("k", json!("v"), json!({}), Duration::from_millis(80), tx);
        std::thread::sleep(Duration::from_millis(40));
        cache.touch("k");
        // Original deadline (80ms from put) has now passed, but touch pushed it out.
        assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());
        cache.shutdown();
    }

    #[test]
    fn remove_suppresses_expiry_event() {
        let cache = CacheService::new();
        let (tx, rx) = conduit_channel::mpmc::bounded(4);
        cache.put("k", json!("v"), json!({}), Duration::from_millis(20), tx);
        assert_eq!(cache.remove("k"), Some(json!("v")));
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
        cache.shutdown();
    }

    #[test]
    fn updating_an_existing_key_merges_objects_and_keeps_the_prior_expiry() {
        let cache = CacheService::new();
        let (tx, rx) = conduit_channel::mpmc::bounded(4);
        cache.put("k", json!({"a": 1}), json!({"v": 1}), Duration::from_millis(200), tx.clone());
        // A short ttl here must NOT shorten the entry's deadline: the prior expiry is kept.
        cache.put("k", json!({"b": 2}), json!({"v": 2, "extra": true}), Duration::from_millis(10), tx);
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::CacheExpiry { expired_data, metadata, .. } => {
                assert_eq!(expired_data, json!({"a": 1, "b": 2}));
                assert_eq!(metadata, json!({"v": 2, "extra": true}));
            }
            other => panic!("expected CacheExpiry, got {other:?}"),
        }
        cache.shutdown();
    }

    #[test]
    fn updating_with_a_non_object_value_replaces_it_outright() {
        let cache = CacheService::new();
        let (tx, rx) = conduit_channel::mpmc::bounded(4);
        cache.put("k", json!("first"), json!({}), Duration::from_millis(200), tx.clone());
        cache.put("k", json!("second"), json!({}), Duration::from_millis(10), tx);
        assert_eq!(cache.get("k"), Some(json!("second")));
        cache.shutdown();
    }

    #[test]
    fn put_overwrite_replaces_data_and_resets_expiry() {
        let cache = CacheService::new();
        let (tx, rx) = conduit_channel::mpmc::bounded(4);
        cache.put("k", json!({"a": 1}), json!({"v": 1}), Duration::from_millis(200), tx.clone());
        cache.put_overwrite("k", json!({"b": 2}), json!({"v": 2}), Duration::from_millis(10), tx);
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::CacheExpiry { expired_data, metadata, .. } => {
                assert_eq!(expired_data, json!({"b": 2}));
                assert_eq!(metadata, json!({"v": 2}));
            }
            other => panic!("expected CacheExpiry, got {other:?}"),
        }
        cache.shutdown();
    }
}

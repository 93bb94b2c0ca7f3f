// SPDX-License-Identifier: Apache-2.0

//! The flow-level KV store (§4.2): a plain string-keyed map shared by every component in a flow,
//! used to keep state across sibling instances (e.g. chat-history structures) that outlives any
//! single message.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// A mutex-guarded key/value map, one per [`crate::flow::Flow`].
#[derive(Default)]
pub struct KvStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl KvStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a key's current value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Writes (or overwrites) a key, returning its previous value if any.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.lock().insert(key.into(), value)
    }

    /// Removes a key, returning its value if present.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_returns_stored_value() {
        let kv = KvStore::new();
        kv.set("history", json!(["hi"]));
        assert_eq!(kv.get("history"), Some(json!(["hi"])));
    }

    #[test]
    fn set_returns_previous_value() {
        let kv = KvStore::new();
        assert_eq!(kv.set("k", json!(1)), None);
        assert_eq!(kv.set("k", json!(2)), Some(json!(1)));
    }

    #[test]
    fn remove_clears_the_key() {
        let kv = KvStore::new();
        kv.set("k", json!(1));
        assert_eq!(kv.remove("k"), Some(json!(1)));
        assert_eq!(kv.get("k"), None);
    }
}

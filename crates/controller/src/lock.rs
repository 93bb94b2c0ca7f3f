// SPDX-License-Identifier: Apache-2.0

//! The flow-level lock manager (§4.2): named, lazily-created locks used to serialize shared KV
//! operations across sibling component instances.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out named locks, creating each one the first time it's requested.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    /// Builds a manager with no locks yet created.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the named lock, creating it first if this is the first request for
    /// `name`. Scoped rather than guard-returning, so callers can't forget to release it.
    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(name.to_owned()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock();
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;

    #[test]
    fn same_name_serializes_across_threads() {
        let manager = Arc::new(LockManager::new());
        let counter = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let manager = manager.clone();
            let counter = counter.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                manager.with_lock("shared", || {
                    let before = counter.load(Ordering::SeqCst);
                    std::thread::yield_now();
                    counter.store(before + 1, Ordering::SeqCst);
                });
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn different_names_do_not_contend() {
        let manager = LockManager::new();
        manager.with_lock("a", || {
            manager.with_lock("b", || {
                // Reaching here proves `a` and `b` are independent locks.
            });
        });
    }
}

//! Channel Registry (spec.md §4.I).
//!
//! The original is a process-wide singly-linked list of every live
//! Channel, appended to on creation, never trimmed on free, and read by
//! the receive loop without any synchronization against application
//! writers. Per REDESIGN FLAGS this becomes a synchronized registry with
//! removal on drop: a `Channel` holds a `Registration` guard (returned by
//! `register`) that deregisters itself when dropped, so a freed Channel's
//! address can be reused by a later one without stale hits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::channel::Channel;

type Map = Arc<Mutex<HashMap<String, Weak<Channel>>>>;

/// Process-wide registry of live channels, keyed by the textual form of
/// their resolved group address — the lookup key `by_address` scans for.
#[derive(Default, Clone)]
pub struct Registry {
    inner: Map,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `channel` under `addr_text`, returning a guard that
    /// removes the entry when dropped (normally when the `Channel` itself
    /// is dropped, since `Channel::new` holds the guard).
    pub fn register(&self, addr_text: String, channel: &Arc<Channel>) -> Registration {
        let mut map = self.inner.lock().unwrap();
        map.insert(addr_text.clone(), Arc::downgrade(channel));
        Registration {
            key: addr_text,
            inner: self.inner.clone(),
        }
    }

    /// Linear scan by stringified address, matching a live channel whose
    /// weak reference hasn't expired.
    pub fn by_address(&self, addr_text: &str) -> Option<Arc<Channel>> {
        let map = self.inner.lock().unwrap();
        map.get(addr_text).and_then(Weak::upgrade)
    }
}

/// Deregisters its channel's address entry when dropped.
pub struct Registration {
    key: String,
    inner: Map,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.lock().unwrap().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[test]
    fn register_then_lookup_succeeds() {
        let registry = Registry::new();
        let channel = Arc::new(Channel::new_for_test());
        let _guard = registry.register("ff3e::1".to_string(), &channel);
        assert!(registry.by_address("ff3e::1").is_some());
    }

    #[test]
    fn drop_removes_the_entry() {
        let registry = Registry::new();
        let channel = Arc::new(Channel::new_for_test());
        let guard = registry.register("ff3e::1".to_string(), &channel);
        drop(guard);
        assert!(registry.by_address("ff3e::1").is_none());
    }

    #[test]
    fn unknown_address_misses() {
        let registry = Registry::new();
        assert!(registry.by_address("ff3e::9").is_none());
    }
}

//! Bounded recently-seen signature set
//!
//! Shared by the push and poll channels of one monitor. Eviction is
//! oldest-first by insertion; lookups do not refresh recency.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct SeenSignatures {
    inner: Mutex<LruCache<String, ()>>,
}

impl SeenSignatures {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Mark a signature seen; `false` if it already was
    pub fn insert_if_new(&self, signature: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains(signature) {
            return false;
        }
        inner.put(signature.to_string(), ());
        true
    }

    /// Forget a signature so another channel can observe it again
    pub fn remove(&self, signature: &str) -> bool {
        self.inner.lock().pop(signature).is_some()
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.inner.lock().contains(signature)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Last-failed-order cache for one-touch retry
//!
//! At most one live record per owner; a new failure overwrites the previous
//! one. Records older than the TTL are neither reported nor reusable.

use crate::models::FailedOrderRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    stored_at: Instant,
    record: FailedOrderRecord,
}

pub struct FailedOrderCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl FailedOrderCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store the owner's latest failure, replacing any earlier one
    pub fn record(&self, record: FailedOrderRecord) {
        let mut entries = self.entries.write();
        entries.insert(
            record.owner_id.clone(),
            Entry {
                stored_at: Instant::now(),
                record,
            },
        );
    }

    pub fn get_last_failed(&self, owner_id: &str) -> Option<FailedOrderRecord> {
        let entries = self.entries.read();
        entries
            .get(owner_id)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.record.clone())
    }

    pub fn has_recent(&self, owner_id: &str) -> bool {
        self.get_last_failed(owner_id).is_some()
    }

    /// Remove and return a live record for retry
    pub fn take(&self, owner_id: &str) -> Option<FailedOrderRecord> {
        let mut entries = self.entries.write();
        let entry = entries.remove(owner_id)?;
        (entry.stored_at.elapsed() < self.ttl).then_some(entry.record)
    }

    pub fn clear(&self, owner_id: &str) {
        self.entries.write().remove(owner_id);
    }

    /// Drop expired records, returning how many were removed
    pub fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

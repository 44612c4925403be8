//! Slot-ordered hold buffer for one watched address
//!
//! Push and poll may observe transactions out of order. Events are held for
//! a short time and released lowest `(slot, arrival)` first.

use crate::models::PurchaseEvent;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

struct Held {
    event: PurchaseEvent,
    enqueued_at: Instant,
}

pub struct ReorderBuffer {
    hold: Duration,
    entries: BTreeMap<(u64, u64, String), Held>,
}

impl ReorderBuffer {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, event: PurchaseEvent, arrival_seq: u64) {
        let key = (event.slot, arrival_seq, event.source_signature.clone());
        self.entries.entry(key).or_insert(Held {
            event,
            enqueued_at: Instant::now(),
        });
    }

    /// Release every event whose hold elapsed, in slot order
    ///
    /// An event that is ready also releases earlier-slot events still held.
    pub fn pop_ready(&mut self) -> Vec<PurchaseEvent> {
        let now = Instant::now();
        let Some(last_ready) = self
            .entries
            .iter()
            .filter(|(_, held)| now.duration_since(held.enqueued_at) >= self.hold)
            .map(|(key, _)| key.clone())
            .next_back()
        else {
            return Vec::new();
        };

        let rest = self.entries.split_off(&last_ready);
        let mut released: Vec<PurchaseEvent> =
            std::mem::replace(&mut self.entries, rest).into_values().map(|h| h.event).collect();
        if let Some(held) = self.entries.remove(&last_ready) {
            released.push(held.event);
        }
        released
    }

    /// Time until the oldest held event is due
    pub fn wait_duration(&self) -> Option<Duration> {
        let oldest = self.entries.values().map(|h| h.enqueued_at).min()?;
        Some(self.hold.saturating_sub(oldest.elapsed()))
    }

    pub fn drain(&mut self) -> Vec<PurchaseEvent> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|h| h.event)
            .collect()
    }
}

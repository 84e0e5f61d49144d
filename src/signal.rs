// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub type SubscriptionId = u64;

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A multicast callback list.
///
/// Slots run on the emitting thread. Emission snapshots the slot list and
/// invokes it with no lock held, so a slot may connect or disconnect on the
/// same signal re-entrantly. Disconnection during an emit does not stop the
/// already-snapshotted delivery.
pub struct Signal<T> {
    slots: Mutex<Vec<(SubscriptionId, Slot<T>)>>,
    next_id: AtomicU64,
}

impl<T> Signal<T> {
    pub fn new() -> Signal<T> {
        Signal {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn connect<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().push((id, Arc::new(f)));
        id
    }

    pub fn disconnect(&self, id: SubscriptionId) {
        self.slots.lock().retain(|(slot_id, _)| *slot_id != id);
    }

    pub fn is_connected(&self) -> bool {
        !self.slots.lock().is_empty()
    }

    pub(crate) fn emit(&self, arg: &T) {
        let snapshot: Vec<Slot<T>> = self
            .slots
            .lock()
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();
        for slot in snapshot {
            slot(arg);
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Signal<T> {
        Signal::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_connect_emit_disconnect() {
        let sig = Signal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(!sig.is_connected());

        let h = hits.clone();
        let id = sig.connect(move |v: &usize| {
            h.fetch_add(*v, Ordering::SeqCst);
        });
        assert!(sig.is_connected());

        sig.emit(&2);
        sig.emit(&3);
        assert_eq!(hits.load(Ordering::SeqCst), 5);

        sig.disconnect(id);
        assert!(!sig.is_connected());
        sig.emit(&100);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_reentrant_disconnect_from_slot() {
        let sig = Arc::new(Signal::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let id_cell = Arc::new(Mutex::new(0u64));

        let (s, h, c) = (sig.clone(), hits.clone(), id_cell.clone());
        *id_cell.lock() = sig.connect(move |_: &()| {
            h.fetch_add(1, Ordering::SeqCst);
            s.disconnect(*c.lock());
        });

        sig.emit(&());
        sig.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

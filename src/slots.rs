//! Fixed-capacity slot table for live sessions
//!
//! Every session occupies one of 128 slots; the slot index doubles as
//! byte 0 of the client id, so it must fit in a `u8`. A slot is reserved
//! before negotiation finishes and only becomes ready once the outbound
//! data channel opens and the real writer is installed.

use crate::channel::PacketSink;
use crate::error::RelayError;
use std::sync::{Arc, Mutex};

/// Number of slots, and therefore the maximum number of live sessions
pub const SLOT_CAPACITY: usize = 128;

/// State of a single slot
enum SlotState {
    /// No session
    Free,
    /// Allocated, writer not yet installed
    Reserved,
    /// Carrying a live outbound writer
    Ready(Arc<dyn PacketSink>),
}

/// Thread-safe table of outbound writers indexed by slot
pub struct SlotTable {
    slots: Mutex<Vec<SlotState>>,
}

impl SlotTable {
    /// Create an empty table.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(SLOT_CAPACITY);
        slots.resize_with(SLOT_CAPACITY, || SlotState::Free);
        SlotTable {
            slots: Mutex::new(slots),
        }
    }

    /// Allocate the lowest free slot, optionally installing a writer.
    ///
    /// Returns [`RelayError::CapacityExhausted`] when all slots hold a
    /// live session.
    pub fn add(&self, writer: Option<Arc<dyn PacketSink>>) -> Result<u8, RelayError> {
        let mut slots = self.slots.lock().expect("slot table lock poisoned");
        for (index, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, SlotState::Free) {
                *slot = match writer {
                    Some(w) => SlotState::Ready(w),
                    None => SlotState::Reserved,
                };
                return Ok(index as u8);
            }
        }
        Err(RelayError::CapacityExhausted)
    }

    /// Install the writer at `index`, replacing whatever was there.
    /// Indices beyond the table are ignored.
    pub fn replace(&self, index: u8, writer: Arc<dyn PacketSink>) {
        let mut slots = self.slots.lock().expect("slot table lock poisoned");
        if let Some(slot) = slots.get_mut(index as usize) {
            *slot = SlotState::Ready(writer);
        }
    }

    /// Look up the writer at `index`.
    ///
    /// A reserved slot yields `None`: the session is not ready yet and the
    /// caller drops the packet. Indices beyond the table also yield `None`.
    pub fn get(&self, index: u8) -> Option<Arc<dyn PacketSink>> {
        let slots = self.slots.lock().expect("slot table lock poisoned");
        match slots.get(index as usize) {
            Some(SlotState::Ready(writer)) => Some(Arc::clone(writer)),
            _ => None,
        }
    }

    /// Free the slot. Idempotent; indices beyond the table are ignored.
    pub fn remove(&self, index: u8) {
        let mut slots = self.slots.lock().expect("slot table lock poisoned");
        if let Some(slot) = slots.get_mut(index as usize) {
            *slot = SlotState::Free;
        }
    }

    /// Number of free slots.
    pub fn free_count(&self) -> usize {
        let slots = self.slots.lock().expect("slot table lock poisoned");
        slots
            .iter()
            .filter(|s| matches!(s, SlotState::Free))
            .count()
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl PacketSink for NullSink {
        async fn send_packet(&self, data: &[u8]) -> Result<usize> {
            Ok(data.len())
        }
    }

    #[test]
    fn test_add_returns_lowest_free_index() {
        let table = SlotTable::new();
        assert_eq!(table.add(None).unwrap(), 0);
        assert_eq!(table.add(None).unwrap(), 1);
        assert_eq!(table.add(None).unwrap(), 2);

        table.remove(1);
        assert_eq!(table.add(None).unwrap(), 1);
    }

    #[test]
    fn test_capacity_exhausted() {
        let table = SlotTable::new();
        for i in 0..SLOT_CAPACITY {
            assert_eq!(table.add(None).unwrap() as usize, i);
        }
        assert!(matches!(
            table.add(None),
            Err(RelayError::CapacityExhausted)
        ));
        assert_eq!(table.free_count(), 0);
    }

    #[test]
    fn test_reserved_slot_reads_as_not_ready() {
        let table = SlotTable::new();
        let index = table.add(None).unwrap();
        assert!(table.get(index).is_none());

        table.replace(index, Arc::new(NullSink));
        assert!(table.get(index).is_some());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = SlotTable::new();
        let index = table.add(Some(Arc::new(NullSink))).unwrap();
        table.remove(index);
        table.remove(index);
        assert_eq!(table.free_count(), SLOT_CAPACITY);
        assert!(table.get(index).is_none());
    }

    #[test]
    fn test_out_of_range_indices_are_ignored() {
        let table = SlotTable::new();
        assert!(table.get(200).is_none());
        table.remove(200);
        table.replace(200, Arc::new(NullSink));
        assert_eq!(table.free_count(), SLOT_CAPACITY);
    }

    #[test]
    fn test_concurrent_adds_get_unique_indices() {
        let table = Arc::new(SlotTable::new());
        let mut handles = Vec::new();
        for _ in 0..SLOT_CAPACITY {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || table.add(None).unwrap()));
        }

        let mut indices: Vec<u8> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), SLOT_CAPACITY);
        assert_eq!(table.free_count(), 0);
    }
}

//! Case-insensitive address deduplication, first occurrence wins.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::records::{Address, AddressedRecord, RejectReason, RejectedRecord};

/// Tracks addresses seen so far in one batch.
///
/// Owned by the caller for the duration of one run; nothing is shared
/// between runs.
#[derive(Debug, Default)]
pub struct Deduplicator {
    /// Case-folded key → the address as first seen.
    seen: HashMap<String, Address>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time an address (case-folded) is offered.
    pub fn admit(&mut self, pair: &AddressedRecord) -> bool {
        match self.seen.entry(pair.address.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(pair.address.clone());
                true
            }
        }
    }

    /// Split pairs into first occurrences and dropped duplicates.
    ///
    /// Duplicates are reported against the address of the entry that was kept,
    /// with their original record untouched.
    pub fn partition(
        &mut self,
        pairs: Vec<AddressedRecord>,
    ) -> (Vec<AddressedRecord>, Vec<RejectedRecord>) {
        let mut kept: Vec<AddressedRecord> = Vec::with_capacity(pairs.len());
        let mut dropped = Vec::new();

        for pair in pairs {
            if self.admit(&pair) {
                kept.push(pair);
                continue;
            }
            let of = self
                .seen
                .get(&pair.address.key())
                .cloned()
                .unwrap_or_else(|| pair.address.clone());
            dropped.push(RejectedRecord {
                record: pair.record,
                index: pair.index,
                reason: RejectReason::Duplicate { of },
            });
        }

        (kept, dropped)
    }
}

/// Collapse pairs to one entry per case-folded address, keeping input order.
pub fn dedup(pairs: Vec<AddressedRecord>) -> Vec<AddressedRecord> {
    let mut seen = Deduplicator::new();
    pairs.into_iter().filter(|p| seen.admit(p)).collect()
}

//! Circular registry of live thread records.
//!
//! Records sit in a slot table and are chained through their `next` slot
//! into a single ring. The ring order is insertion order and is what the
//! scheduler walks when it looks for the next runnable thread.

use crate::error::{Error, Result};
use crate::thread::ThreadRecord;

#[derive(Debug, Default)]
pub(crate) struct Registry {
    slots: Vec<Option<ThreadRecord>>,
    /// Vacated slots, reused before the table grows
    free: Vec<usize>,
    head: Option<usize>,
    /// Last record in ring order, so appends are O(1)
    tail: Option<usize>,
    len: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn get(&self, slot: usize) -> Option<&ThreadRecord> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut ThreadRecord> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Two distinct records at once.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut ThreadRecord, &mut ThreadRecord)> {
        let [first, second] = self.slots.get_disjoint_mut([a, b]).ok()?;
        Some((first.as_mut()?, second.as_mut()?))
    }

    /// Slot following `slot` in ring order.
    ///
    /// # Panics
    /// If `slot` is vacant.
    pub fn next(&self, slot: usize) -> usize {
        self.slots[slot]
            .as_ref()
            .expect("ring link to vacant slot")
            .next
    }

    /// Append `record` at the tail of the ring and return its slot.
    ///
    /// Nothing changes if the slot table cannot grow.
    pub fn register(&mut self, mut record: ThreadRecord) -> Result<usize> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots
                    .try_reserve(1)
                    .map_err(|_| Error::RecordAllocation)?;
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        match (self.head, self.tail) {
            (Some(head), Some(tail)) => {
                record.next = head;
                self.slots[tail]
                    .as_mut()
                    .expect("registry tail is vacant")
                    .next = slot;
            }
            _ => {
                record.next = slot;
                self.head = Some(slot);
            }
        }
        self.tail = Some(slot);
        self.slots[slot] = Some(record);
        self.len += 1;

        Ok(slot)
    }

    /// Unlink the record in `slot` and hand it back.
    ///
    /// If it was the head, its successor becomes the head.
    pub fn unregister(&mut self, slot: usize) -> Option<ThreadRecord> {
        let next = self.get(slot)?.next;

        if next == slot {
            self.head = None;
            self.tail = None;
        } else {
            let mut prev = next;
            while self.next(prev) != slot {
                prev = self.next(prev);
            }
            self.slots[prev]
                .as_mut()
                .expect("ring link to vacant slot")
                .next = next;

            if self.head == Some(slot) {
                self.head = Some(next);
            }
            if self.tail == Some(slot) {
                self.tail = Some(prev);
            }
        }

        self.len -= 1;
        self.free.push(slot);
        self.slots[slot].take()
    }

    /// Walk the ring once starting at `start` itself.
    pub fn iter_from(&self, start: usize) -> RingIter<'_> {
        RingIter {
            registry: self,
            cursor: start,
            remaining: if self.get(start).is_some() { self.len } else { 0 },
        }
    }

    /// Walk the ring once starting just after `slot`, ending before it.
    pub fn iter_after(&self, slot: usize) -> RingIter<'_> {
        match self.get(slot) {
            Some(record) => RingIter {
                registry: self,
                cursor: record.next,
                remaining: self.len - 1,
            },
            None => RingIter {
                registry: self,
                cursor: slot,
                remaining: 0,
            },
        }
    }

    /// First slot from the head, head included, whose record matches.
    pub fn find_from_head(&self, pred: impl Fn(&ThreadRecord) -> bool) -> Option<usize> {
        let head = self.head()?;
        self.iter_from(head).find(|&slot| self.get(slot).is_some_and(&pred))
    }

    /// First slot after `slot`, wrapping around but never reaching `slot`
    /// itself, whose record matches.
    pub fn find_after(&self, slot: usize, pred: impl Fn(&ThreadRecord) -> bool) -> Option<usize> {
        self.iter_after(slot)
            .find(|&s| self.get(s).is_some_and(&pred))
    }

    /// Drain every record, leaving the registry empty.
    pub fn drain(&mut self) -> impl Iterator<Item = ThreadRecord> + '_ {
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.free.clear();
        self.slots.drain(..).flatten()
    }
}

/// Slots in ring order.
pub(crate) struct RingIter<'a> {
    registry: &'a Registry,
    cursor: usize,
    remaining: usize,
}

impl Iterator for RingIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let slot = self.cursor;
        self.cursor = self.registry.next(slot);
        Some(slot)
    }
}

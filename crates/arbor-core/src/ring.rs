//! Index-based circular list used for update queues and effect lists.
//!
//! Entries are linked through `next` indices and the ring remembers its
//! tail, so the head is always `slots[tail].next`. Appending another ring
//! splices it in after the tail in constant link updates.

#[derive(Clone)]
struct Slot<T> {
    value: T,
    next: usize,
}

#[derive(Clone)]
pub(crate) struct Ring<T> {
    slots: Vec<Slot<T>>,
    tail: Option<usize>,
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Ring<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            tail: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tail.is_none()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn push(&mut self, value: T) {
        let index = self.slots.len();
        match self.tail {
            None => self.slots.push(Slot { value, next: index }),
            Some(tail) => {
                let head = self.slots[tail].next;
                self.slots.push(Slot { value, next: head });
                self.slots[tail].next = index;
            }
        }
        self.tail = Some(index);
    }

    /// Splice `other` after the current tail.
    pub(crate) fn append(&mut self, other: Ring<T>) {
        let Some(other_tail) = other.tail else {
            return;
        };
        let Some(tail) = self.tail else {
            *self = other;
            return;
        };
        let offset = self.slots.len();
        let head = self.slots[tail].next;
        let other_head = other.slots[other_tail].next + offset;
        self.slots.extend(other.slots.into_iter().map(|slot| Slot {
            value: slot.value,
            next: slot.next + offset,
        }));
        self.slots[tail].next = other_head;
        self.slots[other_tail + offset].next = head;
        self.tail = Some(other_tail + offset);
    }

    pub(crate) fn iter(&self) -> RingIter<'_, T> {
        RingIter {
            ring: self,
            cursor: self.tail.map(|tail| self.slots[tail].next),
            remaining: self.slots.len(),
        }
    }
}

pub(crate) struct RingIter<'a, T> {
    ring: &'a Ring<T>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, T> Iterator for RingIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.cursor?;
        let slot = &self.ring.slots[index];
        self.remaining -= 1;
        self.cursor = Some(slot.next);
        Some(&slot.value)
    }
}

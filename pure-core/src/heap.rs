// Term heap: slab storage with free-list recycling
//
// Every slot carries a reference count and a generation. Slots with a zero
// count that still hold a term are "floating": they sit on the tmps list,
// an intrusive doubly-linked list threaded through the slots, so that
// ownership changes can unlink them in O(1) regardless of creation order.
//
// This module only manages storage. Reference counting with its release
// semantics lives in ownership.rs, since releasing may run finalizers.

use crate::error::fatal;
use crate::term::{TermData, TermRef};

const NO_LINK: u32 = u32::MAX;

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) refc: u32,
    pub(crate) data: TermData,
    pub(crate) sentry: Option<TermRef>,
    prev: u32,
    next: u32,
    floating: bool,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            generation: 0,
            refc: 0,
            data: TermData::Vacant,
            sentry: None,
            prev: NO_LINK,
            next: NO_LINK,
            floating: false,
        }
    }
}

/// Allocation statistics, mostly for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub live: usize,
    pub free_slots: usize,
    pub floating: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    tmps_head: u32,
    tmps_len: usize,
    live: usize,
    chunk: usize,
}

impl Heap {
    pub fn new(chunk: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            tmps_head: NO_LINK,
            tmps_len: 0,
            live: 0,
            chunk: chunk.max(1),
        }
    }

    // A fresh term starts with count 0 at the head of the tmps list.
    pub(crate) fn alloc(&mut self, data: TermData) -> TermRef {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() == self.slots.capacity() {
                    log::trace!(
                        "heap: growing by {} slots (live = {})",
                        self.chunk,
                        self.live
                    );
                    self.slots.reserve(self.chunk);
                }
                let index = self.slots.len();
                if index >= NO_LINK as usize {
                    fatal(format_args!("term heap exhausted"));
                }
                self.slots.push(Slot::vacant());
                index as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.refc = 0;
        slot.data = data;
        slot.sentry = None;
        self.live += 1;
        self.float(index);
        TermRef::new(index, self.slots[index as usize].generation)
    }

    fn check(&self, x: TermRef) -> usize {
        let index = x.index() as usize;
        match self.slots.get(index) {
            Some(slot) if slot.generation == x.generation() => {
                if matches!(slot.data, TermData::Vacant) {
                    fatal(format_args!("access to freed term {:?}", x));
                }
                index
            }
            Some(_) => fatal(format_args!("stale term handle {:?}", x)),
            None => fatal(format_args!("invalid term handle {:?}", x)),
        }
    }

    pub(crate) fn slot(&self, x: TermRef) -> &Slot {
        &self.slots[self.check(x)]
    }

    pub(crate) fn slot_mut(&mut self, x: TermRef) -> &mut Slot {
        let index = self.check(x);
        &mut self.slots[index]
    }

    pub(crate) fn data(&self, x: TermRef) -> &TermData {
        &self.slot(x).data
    }

    pub(crate) fn data_mut(&mut self, x: TermRef) -> &mut TermData {
        &mut self.slot_mut(x).data
    }

    /// Whether `x` still refers to a live term (not recycled).
    pub fn is_live(&self, x: TermRef) -> bool {
        match self.slots.get(x.index() as usize) {
            Some(slot) => {
                slot.generation == x.generation() && !matches!(slot.data, TermData::Vacant)
            }
            None => false,
        }
    }

    pub fn refc(&self, x: TermRef) -> u32 {
        self.slot(x).refc
    }

    pub(crate) fn is_floating(&self, x: TermRef) -> bool {
        self.slot(x).floating
    }

    // Link a slot at the head of tmps.
    pub(crate) fn float(&mut self, index: u32) {
        let head = self.tmps_head;
        {
            let slot = &mut self.slots[index as usize];
            if slot.floating {
                return;
            }
            slot.floating = true;
            slot.prev = NO_LINK;
            slot.next = head;
        }
        if head != NO_LINK {
            self.slots[head as usize].prev = index;
        }
        self.tmps_head = index;
        self.tmps_len += 1;
    }

    // Unlink a slot from tmps.
    pub(crate) fn sink(&mut self, index: u32) {
        let (prev, next) = {
            let slot = &mut self.slots[index as usize];
            if !slot.floating {
                return;
            }
            slot.floating = false;
            let links = (slot.prev, slot.next);
            slot.prev = NO_LINK;
            slot.next = NO_LINK;
            links
        };
        if prev == NO_LINK {
            self.tmps_head = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next != NO_LINK {
            self.slots[next as usize].prev = prev;
        }
        self.tmps_len -= 1;
    }

    // Returns the slot to the free list and hands back its contents. The
    // generation bump invalidates every outstanding handle.
    pub(crate) fn recycle(&mut self, x: TermRef) -> TermData {
        let index = self.check(x);
        self.sink(index as u32);
        let slot = &mut self.slots[index];
        let data = core::mem::replace(&mut slot.data, TermData::Vacant);
        slot.sentry = None;
        slot.refc = 0;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index as u32);
        self.live -= 1;
        data
    }

    /// Snapshot of the floating temporaries, most recent first.
    pub fn tmps(&self) -> Vec<TermRef> {
        let mut out = Vec::with_capacity(self.tmps_len);
        let mut index = self.tmps_head;
        while index != NO_LINK {
            let slot = &self.slots[index as usize];
            out.push(TermRef::new(index, slot.generation));
            index = slot.next;
        }
        out
    }

    pub fn tmps_len(&self) -> usize {
        self.tmps_len
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live: self.live,
            free_slots: self.free.len(),
            floating: self.tmps_len,
            capacity: self.slots.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_floats_fresh_terms() {
        let mut heap = Heap::new(16);
        let a = heap.alloc(TermData::Int(1));
        let b = heap.alloc(TermData::Int(2));

        assert_eq!(heap.refc(a), 0);
        assert_eq!(heap.tmps(), vec![b, a]);
        assert_eq!(heap.stats().live, 2);
    }

    #[test]
    fn test_sink_middle_of_tmps() {
        let mut heap = Heap::new(16);
        let a = heap.alloc(TermData::Int(1));
        let b = heap.alloc(TermData::Int(2));
        let c = heap.alloc(TermData::Int(3));

        heap.sink(b.index());
        assert_eq!(heap.tmps(), vec![c, a]);
        assert_eq!(heap.tmps_len(), 2);

        // Sinking twice is harmless
        heap.sink(b.index());
        assert_eq!(heap.tmps_len(), 2);

        heap.float(b.index());
        assert_eq!(heap.tmps(), vec![b, c, a]);
    }

    #[test]
    fn test_recycle_invalidates_handle() {
        let mut heap = Heap::new(16);
        let a = heap.alloc(TermData::Str("x".into()));
        let data = heap.recycle(a);
        assert!(matches!(data, TermData::Str(ref s) if s == "x"));
        assert!(!heap.is_live(a));
        assert_eq!(heap.tmps_len(), 0);

        // The slot is reused with a new generation
        let b = heap.alloc(TermData::Int(9));
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(heap.is_live(b));
    }

    #[test]
    #[should_panic(expected = "stale term handle")]
    fn test_stale_handle_is_fatal() {
        let mut heap = Heap::new(16);
        let a = heap.alloc(TermData::Int(1));
        heap.recycle(a);
        let _b = heap.alloc(TermData::Int(2));
        heap.refc(a);
    }
}

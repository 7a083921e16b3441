use arc_swap::ArcSwapOption;
use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use crate::sync::{AtomicBool, AtomicUsize, Backoff, Ordering};
use crossbeam_utils::CachePadded;
use std::collections::TryReserveError;
use std::sync::Arc;

/// One ring cell: the payload plus the lap tag that says who may touch it.
///
/// For ring index `i` the sequence starts at `i`. A write at absolute
/// position `p` publishes `p + 1`; the matching read publishes `p + L`.
pub(crate) struct Slot<T> {
    sequence: AtomicUsize,
    item: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new(sequence: usize) -> Self {
        Slot {
            sequence: AtomicUsize::new(sequence),
            item: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Fixed-capacity ring buffer of `L` slots, the growth unit of
/// [`SegmentQueue`](crate::SegmentQueue).
///
/// - Producers claim slots with one CAS on `tail`, consumers with one CAS on `head`
/// - Both counters are absolute; the ring index is `counter & (L - 1)`
/// - Once frozen, `tail` carries `FREEZE_OFFSET` and every enqueue fails
pub struct Segment<T, const L: usize> {
    slots: Box<[Slot<T>]>,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    frozen_for_enqueues: AtomicBool,
    next: ArcSwapOption<Segment<T, L>>,
}

// Safety: a slot's item is only touched by the thread that won the CAS for its position,
// and the sequence store/load pair orders the hand-off between producer and consumer.
unsafe impl<T: Send, const L: usize> Send for Segment<T, L> {}
unsafe impl<T: Send, const L: usize> Sync for Segment<T, L> {}

impl<T, const L: usize> Segment<T, L> {
    const MASK: usize = L - 1;

    /// Added to `tail` on freeze so enqueuers see a negative lap difference forever.
    pub const FREEZE_OFFSET: usize = 2 * L;

    const VALID_CAPACITY: () = assert!(
        L >= 2 && L.is_power_of_two(),
        "segment capacity must be a power of two >= 2"
    );

    /// Allocate an empty segment, reporting allocation failure instead of aborting.
    pub fn try_new() -> Result<Self, TryReserveError> {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;

        let mut slots = Vec::new();
        slots.try_reserve_exact(L)?;
        slots.extend((0..L).map(Slot::new));

        Ok(Segment {
            slots: slots.into_boxed_slice(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            frozen_for_enqueues: AtomicBool::new(false),
            next: ArcSwapOption::empty(),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        L
    }

    /// Claim the next tail slot and publish `item` into it.
    ///
    /// Hands the item back when the segment is full or frozen.
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let slot = &self.slots[tail & Self::MASK];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(tail) as isize;

            if diff == 0 {
                if self
                    .tail
                    .compare_exchange(
                        tail,
                        tail.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    unsafe { (*slot.item.get()).write(item) };
                    slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
            } else if diff < 0 {
                return Err(item);
            }
            // diff > 0: another producer claimed this position first
        }
    }

    /// Claim the oldest committed item.
    ///
    /// Returns `None` only when every claimed position has been consumed. A
    /// position claimed by a producer that has not written yet is waited for.
    pub fn try_dequeue(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let slot = &self.slots[head & Self::MASK];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(head.wrapping_add(1)) as isize;

            if diff == 0 {
                if self
                    .head
                    .compare_exchange(
                        head,
                        head.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    let item = unsafe { (*slot.item.get()).assume_init_read() };
                    slot.sequence.store(head.wrapping_add(L), Ordering::Release);
                    return Some(item);
                }
            } else if diff < 0 {
                if self.is_drained_from(head) {
                    return None;
                }
                backoff.snooze();
            }
        }
    }

    /// Whether a committed item sits at `head`, without claiming it.
    pub fn try_peek(&self) -> bool {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let slot = &self.slots[head & Self::MASK];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(head.wrapping_add(1)) as isize;

            if diff == 0 {
                return true;
            } else if diff < 0 {
                if self.is_drained_from(head) {
                    return false;
                }
                backoff.snooze();
            }
        }
    }

    /// Whether every claimed position up to `tail` has been consumed, as seen
    /// by a reader that loaded `head`.
    ///
    /// The frozen flag decides whether `tail` carries the offset. A `head` that
    /// moved meanwhile is stale, so the answer is `false` and the caller retries.
    pub(crate) fn is_drained_from(&self, head: usize) -> bool {
        let tail = self.tail.load(Ordering::Acquire);
        let drained = (tail.wrapping_sub(head) as isize) <= 0
            || (self.is_frozen()
                && (tail.wrapping_sub(Self::FREEZE_OFFSET).wrapping_sub(head) as isize) <= 0);
        drained && self.head.load(Ordering::Acquire) == head
    }

    /// Stop accepting enqueues. Idempotent: the offset lands on `tail` once.
    pub fn ensure_frozen_for_enqueues(&self) {
        if !self.frozen_for_enqueues.swap(true, Ordering::AcqRel) {
            self.tail.fetch_add(Self::FREEZE_OFFSET, Ordering::AcqRel);
        }
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen_for_enqueues.load(Ordering::Acquire)
    }

    /// Slots claimed by producers and not yet claimed by consumers.
    /// A snapshot only while other threads are active.
    pub fn len(&self) -> usize {
        let (head, tail) = self.positions();
        Self::pending(head, tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw `(head, tail)` counters. `head` is read first so `tail >= head`.
    #[inline]
    pub(crate) fn positions(&self) -> (usize, usize) {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head, tail)
    }

    /// In-use slots for a `(head, tail)` pair read in that order.
    ///
    /// An unfrozen span never exceeds `L`, a frozen one is always at least
    /// `FREEZE_OFFSET`, so the counter itself says whether to strip the offset.
    /// Only valid for a pair confirmed by a re-read; a stale `head` breaks it.
    #[inline]
    pub(crate) fn pending(head: usize, tail: usize) -> usize {
        let span = tail.wrapping_sub(head);
        if span >= Self::FREEZE_OFFSET {
            span - Self::FREEZE_OFFSET
        } else {
            span
        }
    }

    /// Item count of a segment strictly between a queue's head and tail.
    ///
    /// Such a segment is frozen and was never dequeued from, so its tail
    /// alone is its total write count.
    pub(crate) fn interior_len(&self) -> usize {
        let (head, tail) = self.positions();
        debug_assert!(self.is_frozen(), "interior segment must be frozen");
        debug_assert_eq!(head, 0, "interior segment was partially drained");
        tail.wrapping_sub(Self::FREEZE_OFFSET)
    }

    pub(crate) fn link(&self, next: Arc<Self>) {
        self.next.store(Some(next));
    }

    #[inline]
    pub(crate) fn has_next(&self) -> bool {
        self.next.load().is_some()
    }

    #[inline]
    pub(crate) fn links_to(&self, other: &Arc<Self>) -> bool {
        match &*self.next.load() {
            Some(next) => Arc::ptr_eq(next, other),
            None => false,
        }
    }

    pub(crate) fn next_full(&self) -> Option<Arc<Self>> {
        self.next.load_full()
    }

    pub(crate) fn take_next(&self) -> Option<Arc<Self>> {
        self.next.swap(None)
    }

    /// Dequeue and drop everything committed. Returns the number of items dropped.
    pub(crate) fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.try_dequeue().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Return the segment to its freshly allocated state.
    ///
    /// Committed items still inside are dropped; the successor link is cleared.
    pub fn reset(&mut self) {
        self.drop_committed();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.sequence.store(index, Ordering::Relaxed);
        }
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.frozen_for_enqueues.store(false, Ordering::Relaxed);
        self.next.store(None);
    }

    fn drop_committed(&mut self) {
        let (head, tail) = self.positions();
        let pending = Self::pending(head, tail);
        for offset in 0..pending {
            let position = head.wrapping_add(offset);
            let slot = &mut self.slots[position & Self::MASK];
            if slot.sequence.load(Ordering::Relaxed) == position.wrapping_add(1) {
                unsafe { slot.item.get_mut().assume_init_drop() };
                slot.sequence.store(position.wrapping_add(L), Ordering::Relaxed);
            }
        }
        self.head.store(head.wrapping_add(pending), Ordering::Relaxed);
    }
}

impl<T, const L: usize> Drop for Segment<T, L> {
    fn drop(&mut self) {
        self.drop_committed();
    }
}

impl<T, const L: usize> fmt::Debug for Segment<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (head, tail) = self.positions();
        f.debug_struct("Segment")
            .field("capacity", &L)
            .field("head", &head)
            .field("tail", &tail)
            .field("frozen", &self.is_frozen())
            .field("linked", &self.has_next())
            .finish()
    }
}

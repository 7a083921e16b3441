use crate::pool::{PoolError, PoolStats, SegmentPool};
use crate::segment::Segment;
use arc_swap::ArcSwap;
use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use segq_core::constants::{
    DEFAULT_INITIAL_POOL_BLOCKS, DEFAULT_MAX_FREE_BLOCKS, DEFAULT_SEGMENT_CAPACITY,
};
use segq_core::{ConfigError, QueueConfig};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("configured segment capacity {configured} does not match the queue's {compiled}")]
    CapacityMismatch { configured: usize, compiled: usize },
}

/// Unbounded MPMC queue made of pooled ring-buffer segments.
///
/// - Enqueue/dequeue claim slots inside the current tail/head segment without locking
/// - `structural` is taken only to link a new tail, retire a drained head,
///   count across three or more segments, or clear
/// - Drained segments go back to a [`SegmentPool`], which may be shared between queues
pub struct SegmentQueue<T, const L: usize = DEFAULT_SEGMENT_CAPACITY> {
    head: ArcSwap<Segment<T, L>>,
    tail: ArcSwap<Segment<T, L>>,
    structural: Mutex<()>,
    pool: Arc<SegmentPool<T, L>>,
}

type SegmentRef<T, const L: usize> = Arc<Segment<T, L>>;

#[cold]
fn allocation_failed(err: PoolError) -> ! {
    error!("segment allocation failed: {}", err);
    panic!("segment allocation failed: {err}")
}

impl<T, const L: usize> SegmentQueue<T, L> {
    /// Create a queue backed by a private pool.
    ///
    /// Panics if the initial segments cannot be allocated; use
    /// [`with_config`](Self::with_config) to get the error instead.
    pub fn new(initial_pool_blocks: usize, max_free_blocks: usize) -> Self {
        SegmentPool::new(initial_pool_blocks, max_free_blocks)
            .and_then(|pool| Self::with_pool(Arc::new(pool)))
            .unwrap_or_else(|err| allocation_failed(err))
    }

    /// Create a queue from validated configuration.
    pub fn with_config(config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        if config.segment_capacity != L {
            return Err(QueueError::CapacityMismatch {
                configured: config.segment_capacity,
                compiled: L,
            });
        }
        let pool = SegmentPool::new(config.initial_pool_blocks, config.max_free_blocks)?;
        Ok(Self::with_pool(Arc::new(pool))?)
    }

    /// Create a queue that rents from, and returns to, an existing pool.
    pub fn with_pool(pool: Arc<SegmentPool<T, L>>) -> Result<Self, PoolError> {
        let first = pool.rent()?;
        Ok(Self {
            head: ArcSwap::new(first.clone()),
            tail: ArcSwap::new(first),
            structural: Mutex::new(()),
            pool,
        })
    }

    pub fn pool(&self) -> &Arc<SegmentPool<T, L>> {
        &self.pool
    }

    /// Append `item`. Never fails; may briefly wait on the structural lock
    /// when the tail segment is full.
    pub fn enqueue(&self, item: T) {
        let rejected = self.tail.load().try_enqueue(item);
        if let Err(item) = rejected {
            self.enqueue_slow(item);
        }
    }

    #[cold]
    fn enqueue_slow(&self, mut item: T) {
        loop {
            {
                let _structural = self.structural.lock();
                let tail = self.tail.load_full();
                item = match tail.try_enqueue(item) {
                    Ok(()) => return,
                    Err(item) => item,
                };

                let fresh = self
                    .pool
                    .rent()
                    .unwrap_or_else(|err| allocation_failed(err));
                tail.ensure_frozen_for_enqueues();
                tail.link(fresh.clone());
                self.tail.store(fresh);
                debug!(segment_capacity = L, "linked new tail segment");
            }

            item = match self.tail.load().try_enqueue(item) {
                Ok(()) => return,
                Err(item) => item,
            };
        }
    }

    /// Remove the oldest item, or `None` if the queue is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        {
            let head = self.head.load();
            if let Some(item) = head.try_dequeue() {
                return Some(item);
            }
            if !head.has_next() && self.is_current_head(&head) {
                return None;
            }
        }
        self.try_dequeue_slow()
    }

    #[cold]
    fn try_dequeue_slow(&self) -> Option<T> {
        loop {
            let head = self.head.load_full();
            if let Some(item) = head.try_dequeue() {
                return Some(item);
            }
            if !head.has_next() {
                // A retired head is unlinked when returned to the pool; reload it.
                if self.is_current_head(&head) {
                    return None;
                }
                continue;
            }
            // A successor exists, so `head` is frozen and this retry is conclusive.
            if let Some(item) = head.try_dequeue() {
                return Some(item);
            }
            self.retire_head(head);
        }
    }

    #[inline]
    fn is_current_head(&self, segment: &Segment<T, L>) -> bool {
        core::ptr::eq(segment, &**self.head.load())
    }

    fn retire_head(&self, drained: SegmentRef<T, L>) {
        let retired = {
            let _structural = self.structural.lock();
            let current = self.head.load();
            if !Arc::ptr_eq(&*current, &drained) {
                return;
            }
            let Some(next) = current.next_full() else {
                return;
            };
            drop(current);
            self.head.swap(next)
        };
        drop(drained);
        debug!(segment_capacity = L, "retired drained head segment");
        self.pool.give_back(retired);
    }

    /// Number of items in the queue.
    ///
    /// Exact when no other thread is mutating the queue; otherwise a
    /// best-effort snapshot.
    pub fn count(&self) -> usize {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load();
            let tail = self.tail.load();

            if Arc::ptr_eq(&*head, &*tail) {
                let (head_pos, tail_pos) = head.positions();
                if Arc::ptr_eq(&*head, &*self.head.load())
                    && Arc::ptr_eq(&*tail, &*self.tail.load())
                    && head.positions() == (head_pos, tail_pos)
                {
                    return Segment::<T, L>::pending(head_pos, tail_pos);
                }
            } else if head.links_to(&tail) {
                let (head_head, head_tail) = head.positions();
                let (tail_head, tail_tail) = tail.positions();
                if Arc::ptr_eq(&*head, &*self.head.load())
                    && Arc::ptr_eq(&*tail, &*self.tail.load())
                    && head.positions() == (head_head, head_tail)
                    && tail.positions() == (tail_head, tail_tail)
                {
                    return Segment::<T, L>::pending(head_head, head_tail)
                        + Segment::<T, L>::pending(tail_head, tail_tail);
                }
            } else {
                drop((head, tail));
                return self.count_locked();
            }

            backoff.snooze();
        }
    }

    fn count_locked(&self) -> usize {
        let _structural = self.structural.lock();
        let head = self.head.load_full();
        let tail = self.tail.load_full();

        let (head_pos, tail_pos) = head.positions();
        let mut count = Segment::<T, L>::pending(head_pos, tail_pos);
        if Arc::ptr_eq(&head, &tail) {
            return count;
        }

        // Dequeue never moves past a segment before draining it, so interior
        // segments still hold every item written to them.
        let mut cursor = head.next_full();
        while let Some(segment) = cursor {
            if Arc::ptr_eq(&segment, &tail) {
                break;
            }
            count += segment.interior_len();
            cursor = segment.next_full();
        }

        let (head_pos, tail_pos) = tail.positions();
        count + Segment::<T, L>::pending(head_pos, tail_pos)
    }

    /// Whether the queue holds no committed item. Best-effort under concurrency.
    pub fn is_empty(&self) -> bool {
        let mut segment = self.head.load_full();
        loop {
            let next = segment.next_full();
            if segment.try_peek() {
                return false;
            }
            segment = match next.or_else(|| segment.next_full()) {
                Some(next) => next,
                None if Arc::ptr_eq(&segment, &*self.tail.load()) => return true,
                // walked onto a segment that was retired or cleared meanwhile
                None => self.head.load_full(),
            };
        }
    }

    /// Number of segments currently linked from head to tail.
    pub fn segment_count(&self) -> usize {
        let _structural = self.structural.lock();
        let tail = self.tail.load_full();
        let mut segments = 1;
        let mut cursor = self.head.load_full();
        while !Arc::ptr_eq(&cursor, &tail) {
            match cursor.next_full() {
                Some(next) => cursor = next,
                None => break,
            }
            segments += 1;
        }
        segments
    }

    /// Drop every queued item and shrink back to a single fresh segment.
    #[instrument(level = "debug", skip_all)]
    pub fn clear(&self) {
        let retired = {
            let _structural = self.structural.lock();
            let fresh = self
                .pool
                .rent()
                .unwrap_or_else(|err| allocation_failed(err));
            self.tail.load().ensure_frozen_for_enqueues();
            let old_tail = self.tail.swap(fresh.clone());
            let old_head = self.head.swap(fresh);
            Self::unlink_chain(old_head, &old_tail)
        };

        let mut dropped = 0;
        let segments = retired.len();
        for segment in retired {
            dropped += segment.drain();
            self.pool.give_back(segment);
        }
        debug!(segments, dropped, "queue cleared");
    }

    /// Tear the queue down, handing every segment back to the pool.
    ///
    /// Returns the pool's statistics after the hand-back; the pool itself is
    /// released once no other queue shares it.
    pub fn dispose(self) -> PoolStats {
        let pool = Arc::clone(&self.pool);
        drop(self);
        pool.stats()
    }

    /// Cut the chain `head..=tail` into individually owned segments.
    fn unlink_chain(head: SegmentRef<T, L>, tail: &SegmentRef<T, L>) -> Vec<SegmentRef<T, L>> {
        let mut chain = Vec::new();
        let mut cursor = Some(head);
        while let Some(segment) = cursor {
            cursor = if Arc::ptr_eq(&segment, tail) {
                None
            } else {
                segment.take_next()
            };
            chain.push(segment);
        }
        chain
    }
}

impl<T> Default for SegmentQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_POOL_BLOCKS, DEFAULT_MAX_FREE_BLOCKS)
    }
}

impl<T, const L: usize> Drop for SegmentQueue<T, L> {
    fn drop(&mut self) {
        let head = self.head.load_full();
        let tail = self.tail.load_full();
        for segment in Self::unlink_chain(head, &tail) {
            segment.drain();
            self.pool.give_back(segment);
        }
    }
}

impl<T, const L: usize> fmt::Debug for SegmentQueue<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentQueue")
            .field("segment_capacity", &L)
            .field("count", &self.count())
            .field("segments", &self.segment_count())
            .field("pool", &self.pool)
            .finish()
    }
}

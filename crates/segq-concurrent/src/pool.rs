use crate::segment::Segment;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use segq_core::constants::DEFAULT_SEGMENT_CAPACITY;
use std::collections::TryReserveError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, trace};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to allocate a segment of {capacity} slots: {source}")]
    Allocation {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Pool of reusable segments so queue growth does not hit the allocator.
///
/// A returned segment may still be observed by threads that loaded it before
/// it was retired, so a cached block is only handed out again once the pool
/// holds the last reference to it. Blocks returned past `max_free_blocks` are
/// released.
pub struct SegmentPool<T, const L: usize = DEFAULT_SEGMENT_CAPACITY> {
    free: Mutex<Vec<Arc<Segment<T, L>>>>,
    max_free_blocks: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
    returned_count: AtomicUsize,
    released_count: AtomicUsize,
}

impl<T, const L: usize> SegmentPool<T, L> {
    /// Create a pool with `initial_blocks` segments allocated up front
    /// (capped at `max_free_blocks`).
    pub fn new(initial_blocks: usize, max_free_blocks: usize) -> Result<Self, PoolError> {
        let warm = initial_blocks.min(max_free_blocks);
        let mut free = Vec::with_capacity(max_free_blocks);
        for _ in 0..warm {
            free.push(Arc::new(Self::allocate()?));
        }
        debug!(
            segment_capacity = L,
            warm,
            max_free_blocks,
            "segment pool created"
        );
        gauge!("segq_pool_cached").set(warm as f64);

        Ok(Self {
            free: Mutex::new(free),
            max_free_blocks,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
            returned_count: AtomicUsize::new(0),
            released_count: AtomicUsize::new(0),
        })
    }

    fn allocate() -> Result<Segment<T, L>, PoolError> {
        Segment::try_new().map_err(|source| PoolError::Allocation {
            capacity: L,
            source,
        })
    }

    /// Hand out an empty, unfrozen, unlinked segment.
    pub fn rent(&self) -> Result<Arc<Segment<T, L>>, PoolError> {
        let reusable = {
            let mut free = self.free.lock();
            let unique = free
                .iter_mut()
                .rposition(|segment| Arc::get_mut(segment).is_some());
            unique.map(|index| (free.swap_remove(index), free.len()))
        };

        if let Some((mut segment, cached)) = reusable {
            gauge!("segq_pool_cached").set(cached as f64);
            if let Some(inner) = Arc::get_mut(&mut segment) {
                inner.reset();
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                counter!("segq_pool_hits").increment(1);
                trace!(cached, "Segment pool hit, reusing segment");
                return Ok(segment);
            }
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        counter!("segq_pool_misses").increment(1);
        trace!("Segment pool miss, allocating segment");
        Ok(Arc::new(Self::allocate()?))
    }

    /// Take a segment back. Its prior contents are undefined to the next renter.
    ///
    /// The successor link is cut even while stale readers still hold the
    /// segment, so a cached block never keeps the live chain reachable.
    #[instrument(level = "trace", skip_all)]
    pub fn give_back(&self, mut segment: Arc<Segment<T, L>>) {
        drop(segment.take_next());
        if let Some(inner) = Arc::get_mut(&mut segment) {
            inner.reset();
        }

        let mut free = self.free.lock();
        if free.len() < self.max_free_blocks {
            free.push(segment);
            let cached = free.len();
            drop(free);
            self.returned_count.fetch_add(1, Ordering::Relaxed);
            gauge!("segq_pool_cached").set(cached as f64);
            trace!(cached, "Returned segment to pool");
        } else {
            drop(free);
            self.released_count.fetch_add(1, Ordering::Relaxed);
            counter!("segq_pool_released").increment(1);
            trace!("Pool full, releasing segment");
            drop(segment);
        }
    }

    pub fn max_free_blocks(&self) -> usize {
        self.max_free_blocks
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            segment_capacity: L,
            max_free_blocks: self.max_free_blocks,
            cached_count: self.free.lock().len(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            returned_count: self.returned_count.load(Ordering::Relaxed),
            released_count: self.released_count.load(Ordering::Relaxed),
        }
    }
}

impl<T, const L: usize> fmt::Debug for SegmentPool<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics for segment pool monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub segment_capacity: usize,
    pub max_free_blocks: usize,
    pub cached_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub returned_count: usize,
    pub released_count: usize,
}

impl PoolStats {
    /// Calculate hit rate percentage
    pub fn hit_rate(&self) -> f64 {
        if self.hit_count + self.miss_count == 0 {
            0.0
        } else {
            (self.hit_count as f64) / ((self.hit_count + self.miss_count) as f64) * 100.0
        }
    }
}

//! Manually managed concurrent data structures for segq
//!
//! - `segment`: Fixed-capacity ring buffer with per-slot sequence numbers
//! - `pool`: Segment pool that recycles ring buffers between queues
//! - `queue`: Unbounded MPMC queue built from a chain of pooled segments

pub mod pool;
pub mod queue;
pub mod segment;
mod sync;

pub use pool::{PoolError, PoolStats, SegmentPool};
pub use queue::{QueueError, SegmentQueue};
pub use segment::Segment;
pub use segq_core::constants::DEFAULT_SEGMENT_CAPACITY;

use segq_concurrent::{QueueError, SegmentPool, SegmentQueue};
use segq_core::{ConfigManager, QueueConfig};
use std::sync::Arc;

#[test]
fn test_fifo_across_segments() {
    let queue = SegmentQueue::<u32>::new(1, 4);
    for i in 1..=3000 {
        queue.enqueue(i);
    }
    assert_eq!(queue.segment_count(), 3);
    assert_eq!(queue.count(), 3000);

    for i in 1..=3000 {
        assert_eq!(queue.try_dequeue(), Some(i));
    }
    assert_eq!(queue.try_dequeue(), None);
}

#[test]
fn test_fifo_with_interleaving() {
    let queue = SegmentQueue::<usize, 16>::new(0, 4);
    let mut next_in = 0usize;
    let mut next_out = 0usize;
    for _ in 0..500 {
        for _ in 0..fastrand::usize(0..40) {
            queue.enqueue(next_in);
            next_in += 1;
        }
        for _ in 0..fastrand::usize(0..40) {
            match queue.try_dequeue() {
                Some(v) => {
                    assert_eq!(v, next_out);
                    next_out += 1;
                }
                None => assert_eq!(next_out, next_in),
            }
        }
        assert_eq!(queue.count(), next_in - next_out);
        assert_eq!(queue.is_empty(), next_in == next_out);
    }
}

#[test]
fn test_empty_queue_dequeue() {
    let queue: SegmentQueue<String> = SegmentQueue::default();
    assert_eq!(queue.try_dequeue(), None);
    assert_eq!(queue.try_dequeue(), None);
    assert!(queue.is_empty());
    assert_eq!(queue.count(), 0);
}

#[test]
fn test_one_past_segment_capacity() {
    const L: usize = 1024;
    let queue = SegmentQueue::<usize, L>::new(2, 4);
    for i in 0..=L {
        queue.enqueue(i);
    }
    assert_eq!(queue.segment_count(), 2);
    assert_eq!(queue.count(), L + 1);

    for i in 0..=L {
        assert_eq!(queue.try_dequeue(), Some(i));
    }
    assert_eq!(queue.segment_count(), 1);
    assert_eq!(queue.pool().stats().returned_count, 1);
    assert!(queue.is_empty());
}

#[test]
fn test_clear_semantics() {
    let queue = SegmentQueue::<u64, 8>::new(1, 2);
    for i in 0..100 {
        queue.enqueue(i);
    }
    queue.clear();
    assert_eq!(queue.count(), 0);
    assert!(queue.is_empty());
    assert_eq!(queue.try_dequeue(), None);

    queue.enqueue(42);
    assert_eq!(queue.count(), 1);
    assert_eq!(queue.try_dequeue(), Some(42));
    assert!(queue.is_empty());
}

#[test]
fn test_clear_on_empty_queue() {
    let queue = SegmentQueue::<u8, 4>::new(0, 1);
    queue.clear();
    queue.clear();
    assert_eq!(queue.segment_count(), 1);
    assert!(queue.is_empty());
}

#[test]
fn test_is_empty_after_head_drained() {
    let queue = SegmentQueue::<u32, 2>::new(0, 4);
    for i in 0..3 {
        queue.enqueue(i);
    }
    // the first segment is exhausted but not yet retired
    assert_eq!(queue.try_dequeue(), Some(0));
    assert_eq!(queue.try_dequeue(), Some(1));
    assert!(!queue.is_empty());
    assert_eq!(queue.count(), 1);
    assert_eq!(queue.try_dequeue(), Some(2));
    assert!(queue.is_empty());
}

#[test]
fn test_pool_reuse_across_growth() {
    let pool = Arc::new(SegmentPool::<u32, 4>::new(0, 8).unwrap());
    let queue = SegmentQueue::with_pool(pool.clone()).unwrap();
    for round in 0..10 {
        for i in 0..12 {
            queue.enqueue(round * 100 + i);
        }
        for i in 0..12 {
            assert_eq!(queue.try_dequeue(), Some(round * 100 + i));
        }
    }
    let stats = pool.stats();
    assert!(stats.hit_count > 0, "segments should be recycled: {stats:?}");
    assert!(stats.miss_count <= 8, "pool kept allocating: {stats:?}");
}

#[test]
fn test_queue_from_config_file() -> anyhow::Result<()> {
    let manager = ConfigManager::from_toml_str(
        r#"
        [queue]
        segment_capacity = 64
        initial_pool_blocks = 1
        max_free_blocks = 2
        "#,
    )?;
    let queue = SegmentQueue::<u32, 64>::with_config(&manager.config().queue)?;
    for i in 0..200 {
        queue.enqueue(i);
    }
    assert_eq!(queue.segment_count(), 4);
    assert_eq!(queue.count(), 200);

    let stats = queue.dispose();
    assert_eq!(stats.segment_capacity, 64);
    assert_eq!(stats.cached_count, 2);
    assert_eq!(stats.released_count, 2);
    Ok(())
}

#[test]
fn test_mismatched_capacity_rejected() {
    let config = QueueConfig {
        segment_capacity: 32,
        ..QueueConfig::default()
    };
    let err = SegmentQueue::<u32, 64>::with_config(&config).unwrap_err();
    assert!(matches!(err, QueueError::CapacityMismatch { .. }));
    assert!(err.to_string().contains("32"));
}

//! Frame pool and ring buffer invariants under the ownership rules the
//! capture and event paths rely on.

use std::sync::Arc;

use vigil::frame::{Frame, FramePool};
use vigil::ring::RingBuffer;

fn push_frame(pool: &FramePool, ring: &RingBuffer, n: u64, width: u32, height: u32) -> bool {
    match pool.acquire() {
        Some(mut frame) => {
            frame.resize(width, height);
            frame.frame_number = n;
            ring.push(Arc::new(frame));
            true
        }
        None => false,
    }
}

#[test]
fn pool_accounting_invariant_holds() {
    let pool = FramePool::new(10);
    let mut held = Vec::new();

    for _ in 0..7 {
        held.push(pool.acquire().unwrap());
        assert_eq!(pool.available() + pool.in_use(), pool.capacity());
    }
    while held.pop().is_some() {
        assert_eq!(pool.available() + pool.in_use(), pool.capacity());
    }
    assert_eq!(pool.available(), 10);
}

#[test]
fn acquire_drop_restores_available() {
    let pool = FramePool::new(5);
    let before = pool.available();
    {
        let _frame = pool.acquire().unwrap();
        assert_eq!(pool.available(), before - 1);
    }
    assert_eq!(pool.available(), before);
}

#[test]
fn ring_snapshot_is_strictly_increasing_suffix() {
    let pool = FramePool::new(32);
    let ring = RingBuffer::new(8);

    for n in 1..=20 {
        assert!(push_frame(&pool, &ring, n, 16, 16));
    }

    let numbers: Vec<u64> = ring.snapshot().iter().map(|f| f.frame_number).collect();
    assert_eq!(numbers.len(), 8);
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*numbers.last().unwrap(), 20);
    assert_eq!(ring.latest().unwrap().frame_number, 20);
}

#[test]
fn ring_size_is_min_of_pushed_and_capacity() {
    let pool = FramePool::new(16);
    let ring = RingBuffer::new(10);

    for n in 1..=4 {
        push_frame(&pool, &ring, n, 8, 8);
    }
    assert_eq!(ring.len(), 4);

    for n in 5..=25 {
        push_frame(&pool, &ring, n, 8, 8);
    }
    assert_eq!(ring.len(), 10);
}

#[test]
fn preroll_scenario_deep_copy_releases_all_pool_frames() {
    // Capacity-75 ring over a pool of 105, filled with pre-roll.
    let pool = FramePool::new(105);
    let ring = RingBuffer::new(75);

    for n in 1..=75 {
        assert!(push_frame(&pool, &ring, n, 64, 48));
    }
    assert_eq!(pool.in_use(), 75);

    // The event task's drain: deep-copy every frame, drop the snapshot.
    let preroll: Vec<Frame> = {
        let snapshot = ring.snapshot();
        snapshot.iter().map(|f| f.to_owned_frame()).collect()
    };
    assert_eq!(preroll.len(), 75);

    // Steady state: the ring itself holds 75, the drain holds none. Once
    // capture churn evicts everything, in_use returns to zero while the
    // owned copies live on.
    ring.clear();
    assert_eq!(pool.in_use(), 0);
    assert_eq!(preroll.iter().filter(|f| f.width == 64).count(), 75);
}

#[test]
fn exhausted_pool_drops_frames_without_blocking() {
    let pool = FramePool::new(3);
    let ring = RingBuffer::new(10);

    for n in 1..=3 {
        assert!(push_frame(&pool, &ring, n, 8, 8));
    }
    // Ring holds all three; the next acquire fails immediately.
    assert!(!push_frame(&pool, &ring, 4, 8, 8));
    assert_eq!(ring.len(), 3);

    // Eviction frees frames again once capacity wraps.
    ring.clear();
    assert!(push_frame(&pool, &ring, 5, 8, 8));
}

#[test]
fn concurrent_readers_and_single_writer() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    let pool = Arc::new(FramePool::new(64));
    let ring = Arc::new(RingBuffer::new(16));
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let ring = Arc::clone(&ring);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            let mut last_seen = 0u64;
            while !done.load(Ordering::Relaxed) {
                let numbers: Vec<u64> =
                    ring.snapshot().iter().map(|f| f.frame_number).collect();
                assert!(numbers.windows(2).all(|w| w[0] < w[1]));
                if let Some(&max) = numbers.last() {
                    assert!(max >= last_seen);
                    last_seen = max;
                }
            }
        }));
    }

    for n in 1..=500 {
        // Writer retries on momentary exhaustion caused by reader snapshots.
        while !push_frame(&pool, &ring, n, 8, 8) {
            std::thread::yield_now();
        }
    }
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(ring.latest().unwrap().frame_number, 500);
}

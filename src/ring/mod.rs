//! Per-camera ring buffer of recent frames
//!
//! Most-recent-N queue with a single writer (the capture thread) and any
//! number of concurrent readers. Frames are shared via `Arc`, so readers
//! hold them without copying; the last reference to drop recycles the
//! frame into its pool.

use std::sync::{Arc, RwLock};

use crate::frame::PooledFrame;

struct Inner {
    slots: Vec<Option<Arc<PooledFrame>>>,
    /// Next write position
    head: usize,
    count: usize,
}

/// Fixed-size ring buffer of shared frames for a single camera
pub struct RingBuffer {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Inner {
                slots: vec![None; capacity],
                head: 0,
                count: 0,
            }),
        }
    }

    /// Push a frame, evicting the oldest when full. Writer-exclusive, O(1).
    pub fn push(&self, frame: Arc<PooledFrame>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let head = inner.head;
        inner.slots[head] = Some(frame);
        inner.head = (head + 1) % self.capacity;
        if inner.count < self.capacity {
            inner.count += 1;
        }
    }

    /// The most recent frame, or `None` if empty
    pub fn latest(&self) -> Option<Arc<PooledFrame>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if inner.count == 0 {
            return None;
        }
        let idx = (inner.head + self.capacity - 1) % self.capacity;
        inner.slots[idx].clone()
    }

    /// All buffered frames, oldest to newest
    pub fn snapshot(&self) -> Vec<Arc<PooledFrame>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let start = (inner.head + self.capacity - inner.count) % self.capacity;
        (0..inner.count)
            .filter_map(|i| inner.slots[(start + i) % self.capacity].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.head = 0;
        inner.count = 0;
    }
}

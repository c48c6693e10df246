//! Decoded frame storage and the recycling frame pool
//!
//! Decoded frames are large (a 1080p BGR frame is ~6 MB) and produced at
//! capture rate, so they are preallocated once and recycled through a
//! fixed-capacity pool instead of going back to the process allocator.
//! [`FramePool::acquire`] never blocks: on exhaustion the caller drops the
//! frame and moves on.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

/// A single decoded video frame in 24-bit interleaved BGR
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel row (`width * 3` for tightly packed BGR)
    pub stride: usize,
    /// Monotonic capture timestamp
    pub timestamp: Instant,
    /// Monotone per-camera sequence number; 0 while pooled
    pub frame_number: u64,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            stride: 0,
            timestamp: Instant::now(),
            frame_number: 0,
            pixels: Vec::new(),
        }
    }

    /// Resize the pixel buffer for new dimensions. Retains capacity where
    /// possible so steady-state recycling does not reallocate.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.stride = width as usize * 3;
        self.pixels.resize(self.stride * height as usize, 0);
    }
}

struct PoolShared {
    capacity: usize,
    free: Mutex<Vec<Box<Frame>>>,
}

impl PoolShared {
    fn recycle(&self, mut frame: Box<Frame>) {
        frame.frame_number = 0;
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        free.push(frame);
    }
}

/// Fixed-capacity pool of preallocated frames.
///
/// `acquire` hands out a [`PooledFrame`] that returns its frame to the free
/// list when dropped. The handle holds only a weak back-reference, so
/// outstanding handles never keep a discarded pool alive; once the pool is
/// gone their frames are simply freed.
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity).map(|_| Box::new(Frame::empty())).collect();
        Self {
            shared: Arc::new(PoolShared {
                capacity,
                free: Mutex::new(free),
            }),
        }
    }

    /// Take a frame from the pool, or `None` when exhausted. Never blocks.
    pub fn acquire(&self) -> Option<PooledFrame> {
        let frame = {
            let mut free = self.shared.free.lock().unwrap_or_else(|e| e.into_inner());
            free.pop()
        }?;

        Some(PooledFrame {
            frame: Some(frame),
            pool: Arc::downgrade(&self.shared),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn available(&self) -> usize {
        self.shared.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn in_use(&self) -> usize {
        self.shared.capacity - self.available()
    }
}

/// Exclusive handle to a pooled [`Frame`]; recycles on drop.
pub struct PooledFrame {
    // Some until drop takes it
    frame: Option<Box<Frame>>,
    pool: Weak<PoolShared>,
}

impl PooledFrame {
    /// Deep-copy into an owned frame, independent of the pool.
    ///
    /// Consumers that hold frames across a capture interval must copy and
    /// release the pooled handle in the same step, or the pool starves.
    pub fn to_owned_frame(&self) -> Frame {
        (**self).clone()
    }
}

impl Deref for PooledFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame.as_deref().expect("frame present until drop")
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut Frame {
        self.frame.as_deref_mut().expect("frame present until drop")
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.recycle(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_recycle() {
        let pool = FramePool::new(3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.available(), 3);

        let frame = pool.acquire().unwrap();
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.in_use(), 1);

        drop(frame);
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_available_plus_in_use_is_capacity() {
        let pool = FramePool::new(4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.available() + pool.in_use(), pool.capacity());
        drop(a);
        assert_eq!(pool.available() + pool.in_use(), pool.capacity());
        drop(b);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let pool = FramePool::new(1);
        let held = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        drop(held);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_sequence_number_reset_on_recycle() {
        let pool = FramePool::new(1);
        {
            let mut frame = pool.acquire().unwrap();
            frame.frame_number = 42;
        }
        let frame = pool.acquire().unwrap();
        assert_eq!(frame.frame_number, 0);
    }

    #[test]
    fn test_resize_sets_stride_and_len() {
        let pool = FramePool::new(1);
        let mut frame = pool.acquire().unwrap();
        frame.resize(320, 240);
        assert_eq!(frame.stride, 960);
        assert_eq!(frame.pixels.len(), 960 * 240);
        assert!(frame.stride >= frame.width as usize * 3);
    }

    #[test]
    fn test_handle_outliving_pool_is_freed() {
        let pool = FramePool::new(1);
        let frame = pool.acquire().unwrap();
        drop(pool);
        // Recycling has nowhere to go; dropping must not panic.
        drop(frame);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let pool = FramePool::new(1);
        let mut frame = pool.acquire().unwrap();
        frame.resize(2, 2);
        frame.pixels[0] = 7;
        frame.frame_number = 9;

        let copy = frame.to_owned_frame();
        drop(frame);
        assert_eq!(copy.pixels[0], 7);
        assert_eq!(copy.frame_number, 9);
        assert_eq!(pool.available(), 1);
    }
}

//! Inter-Stage Buffer Queue
//!
//! Bounded, mutex-guarded FIFO of frame buffers. Reads never block: an
//! empty queue returns `None` and the caller treats the tick as a dropped
//! frame and advances.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

use super::buffer::FrameBuffer;

/// Default queue bound, matching the circulating buffer pool
pub const DEFAULT_QUEUE_DEPTH: usize = 128;

/// Mutex-guarded FIFO of frame buffers
pub struct BufferQueue {
    inner: Mutex<VecDeque<FrameBuffer>>,
    capacity: usize,
}

impl BufferQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking dequeue
    pub fn read(&self) -> Option<FrameBuffer> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Enqueue, dropping the frame when the queue is at capacity
    pub fn write(&self, buf: FrameBuffer) -> bool {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= self.capacity {
            warn!("Queue full, dropping frame {}:{}", buf.frame, buf.subframe);
            return false;
        }
        q.push_back(buf);
        true
    }
}

impl Default for BufferQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let q = BufferQueue::default();
        for n in 0..10 {
            let mut buf = FrameBuffer::new(1);
            buf.subframe = n;
            assert!(q.write(buf));
        }
        for n in 0..10 {
            assert_eq!(q.read().unwrap().subframe, n);
        }
    }

    #[test]
    fn test_empty_read_is_none() {
        let q = BufferQueue::default();
        assert!(q.read().is_none());
    }

    #[test]
    fn test_bounded() {
        let q = BufferQueue::new(2);
        assert!(q.write(FrameBuffer::new(1)));
        assert!(q.write(FrameBuffer::new(1)));
        assert!(!q.write(FrameBuffer::new(1)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_cross_thread_hand_off() {
        use std::sync::Arc;

        let q = Arc::new(BufferQueue::default());
        let writer = q.clone();
        let handle = std::thread::spawn(move || {
            for n in 0..50 {
                let mut buf = FrameBuffer::new(1);
                buf.frame = n;
                writer.write(buf);
            }
        });

        handle.join().unwrap();
        let mut seen = Vec::new();
        while let Some(buf) = q.read() {
            seen.push(buf.frame);
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}

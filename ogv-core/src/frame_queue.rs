//! Bounded queue of decoded frames with reusable slots.
//!
//! The decode loop requests an empty slot, fills it, and either publishes it
//! or hands it back. The consumer pops published frames in decode order and
//! recycles them when done, so payload allocations are reused across the
//! whole playback session. Slots outlive seeks and restarts; the iteration
//! tag stamped on each frame lets consumers discard frames decoded before
//! the most recent epoch change.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// A decoded frame slot.
#[derive(Debug, Default)]
pub struct VideoFrame {
    /// Consumer-defined payload produced by the pixel transform.
    pub payload: Vec<u8>,
    /// Presentation time in seconds.
    pub time_to_display: f32,
    pub frame_number: u64,
    /// Playback epoch this frame belongs to.
    pub iteration: u32,
    /// True from slot request until the consumer recycles the frame.
    pub in_use: bool,
}

struct QueueInner {
    /// Recycled slots available for the decoder.
    free: Vec<VideoFrame>,
    /// Published frames in decode order.
    ready: VecDeque<VideoFrame>,
    /// Slots currently held by the decoder between request and publish.
    loaned: usize,
}

/// Thread-safe bounded frame queue.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    published: AtomicU64,
}

impl FrameQueue {
    /// Creates a queue holding at most `capacity` in-use frames.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                free: Vec::with_capacity(capacity),
                ready: VecDeque::with_capacity(capacity),
                loaned: 0,
            }),
            capacity,
            published: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes an empty slot for decoding, or None when every slot is in use.
    pub fn request_empty(&self) -> Option<VideoFrame> {
        let mut inner = self.inner.lock();
        if inner.ready.len() + inner.loaned >= self.capacity {
            return None;
        }
        inner.loaned += 1;
        let mut frame = inner.free.pop().unwrap_or_default();
        frame.in_use = true;
        Some(frame)
    }

    /// Returns an unfilled slot without publishing it.
    pub fn release_empty(&self, mut frame: VideoFrame) {
        let mut inner = self.inner.lock();
        inner.loaned = inner.loaned.saturating_sub(1);
        frame.in_use = false;
        inner.free.push(frame);
    }

    /// Commits a filled slot to the ready queue.
    pub fn publish(&self, frame: VideoFrame) {
        let mut inner = self.inner.lock();
        inner.loaned = inner.loaned.saturating_sub(1);
        inner.ready.push_back(frame);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Pops the oldest published frame. The consumer keeps the slot until it
    /// calls [`recycle`].
    ///
    /// [`recycle`]: FrameQueue::recycle
    pub fn pop_ready(&self) -> Option<VideoFrame> {
        let mut inner = self.inner.lock();
        let frame = inner.ready.pop_front()?;
        inner.loaned += 1;
        Some(frame)
    }

    /// Presentation time of the oldest published frame.
    pub fn peek_ready_time(&self) -> Option<f32> {
        self.inner
            .lock()
            .ready
            .front()
            .map(|frame| frame.time_to_display)
    }

    pub fn ready_count(&self) -> usize {
        self.inner.lock().ready.len()
    }

    /// Returns a consumed frame's slot to the pool.
    pub fn recycle(&self, mut frame: VideoFrame) {
        let mut inner = self.inner.lock();
        inner.loaned = inner.loaned.saturating_sub(1);
        frame.in_use = false;
        inner.free.push(frame);
    }

    /// Clears published frames and marks every pooled slot unused. Slots
    /// loaned to a consumer stay out until recycled.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        while let Some(mut frame) = inner.ready.pop_front() {
            frame.in_use = false;
            inner.free.push(frame);
        }
    }

    pub fn stats(&self) -> FrameQueueStats {
        let inner = self.inner.lock();
        FrameQueueStats {
            capacity: self.capacity,
            ready: inner.ready.len(),
            loaned: inner.loaned,
            published: self.published.load(Ordering::Relaxed),
        }
    }
}

/// Queue snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FrameQueueStats {
    pub capacity: usize,
    pub ready: usize,
    pub loaned: usize,
    pub published: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_is_bounded_by_capacity() {
        let queue = FrameQueue::new(2);
        let a = queue.request_empty().unwrap();
        let b = queue.request_empty().unwrap();
        assert!(queue.request_empty().is_none());

        queue.publish(a);
        // Still full: one published plus one loaned.
        assert!(queue.request_empty().is_none());
        queue.release_empty(b);
        assert!(queue.request_empty().is_some());
    }

    #[test]
    fn frames_pop_in_publish_order() {
        let queue = FrameQueue::new(3);
        for n in 0..3u64 {
            let mut frame = queue.request_empty().unwrap();
            frame.frame_number = n;
            frame.time_to_display = n as f32 * 0.1;
            queue.publish(frame);
        }
        assert_eq!(queue.peek_ready_time(), Some(0.0));
        for n in 0..3u64 {
            let frame = queue.pop_ready().unwrap();
            assert_eq!(frame.frame_number, n);
            queue.recycle(frame);
        }
        assert!(queue.pop_ready().is_none());
    }

    #[test]
    fn recycled_slots_keep_their_allocation() {
        let queue = FrameQueue::new(1);
        let mut frame = queue.request_empty().unwrap();
        frame.payload = vec![0u8; 4096];
        queue.publish(frame);

        let frame = queue.pop_ready().unwrap();
        let capacity = frame.payload.capacity();
        queue.recycle(frame);

        let frame = queue.request_empty().unwrap();
        assert_eq!(frame.payload.capacity(), capacity);
    }

    #[test]
    fn reset_clears_ready_frames() {
        let queue = FrameQueue::new(4);
        for _ in 0..3 {
            let frame = queue.request_empty().unwrap();
            queue.publish(frame);
        }
        assert_eq!(queue.ready_count(), 3);
        queue.reset();
        assert_eq!(queue.ready_count(), 0);
        // All four slots admit again.
        for _ in 0..4 {
            let frame = queue.request_empty().unwrap();
            queue.publish(frame);
        }
        assert!(queue.request_empty().is_none());
    }

    #[test]
    fn minimum_capacity_is_one() {
        let queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.request_empty().is_some());
    }
}

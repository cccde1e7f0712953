//! Bounded frame queue between a capture worker and its consumers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::frame::Frame;

/// A fixed-capacity queue that drops the oldest frame when full.
///
/// Producers never block and consumers never wait: `push` always succeeds, `pop` returns
/// `None` on an empty queue. Safe to share between threads.
///
/// # Example
///
/// ```rust,ignore
/// let queue = FrameQueue::new(5);
/// queue.push(frame);
/// let latest = queue.pop();
/// ```
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
}

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<Frame>,
    capacity: usize,
    total_pushed: u64,
    total_dropped: u64,
}

impl FrameQueue {
    /// Default number of frames kept per device.
    pub const DEFAULT_CAPACITY: usize = 5;

    /// Create a queue holding at most `capacity` frames (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                capacity,
                total_pushed: 0,
                total_dropped: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame, discarding the oldest one first if the queue is full.
    ///
    /// Returns the discarded frame, if any.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let mut state = self.lock();
        let dropped = if state.frames.len() >= state.capacity {
            state.total_dropped += 1;
            state.frames.pop_front()
        } else {
            None
        };

        state.frames.push_back(frame);
        state.total_pushed += 1;
        dropped
    }

    /// Take the oldest frame.
    pub fn pop(&self) -> Option<Frame> {
        self.lock().frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().total_dropped
    }

    /// Frames ever pushed.
    pub fn pushed(&self) -> u64 {
        self.lock().total_pushed
    }

    /// Discard everything queued, counters are kept.
    pub fn clear(&self) {
        self.lock().frames.clear();
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::fourcc::FourCC;

    fn frame(sequence: u32) -> Frame {
        Frame {
            data: vec![sequence as u8],
            fourcc: FourCC::MJPG,
            compressed: true,
            width: 640,
            height: 480,
            rate: 30,
            sequence,
        }
    }

    #[test]
    fn test_drop_oldest() {
        let queue = FrameQueue::default();
        for seq in 1..=6 {
            queue.push(frame(seq));
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(queue.dropped(), 1);
        for seq in 2..=6 {
            assert_eq!(queue.pop().map(|f| f.sequence), Some(seq));
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_returns_dropped() {
        let queue = FrameQueue::new(1);
        assert!(queue.push(frame(1)).is_none());
        assert_eq!(queue.push(frame(2)).map(|f| f.sequence), Some(1));
        assert_eq!(queue.pushed(), 2);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_clear() {
        let queue = FrameQueue::new(3);
        queue.push(frame(1));
        queue.push(frame(2));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pushed(), 2);
    }

    #[test]
    fn test_concurrent_push_pop() {
        let queue = Arc::new(FrameQueue::new(5));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..1000 {
                    queue.push(frame(seq));
                }
            })
        };

        let mut last = None;
        let mut popped = 0;
        while !producer.is_finished() || !queue.is_empty() {
            if let Some(f) = queue.pop() {
                // order is preserved even while frames are dropped
                if let Some(prev) = last {
                    assert!(f.sequence > prev);
                }
                last = Some(f.sequence);
                popped += 1;
            }
        }
        producer.join().unwrap();

        assert_eq!(popped + queue.dropped(), 1000);
    }
}

//! Bounded FIFO between the camera callback thread and the display consumer.
//!
//! - `enqueue` blocks the producer while the buffer is full (backpressure, never drops).
//! - `dequeue` blocks the consumer while empty; `try_dequeue` is the polling form
//!   used on a refresh tick.
//! - `close` wakes every blocked producer with `BufferClosed`. Frames already
//!   queued stay drainable until the buffer is empty.
//!
//! The upload path never reads from here; it samples the last *displayed* frame
//! (see `display::LastDisplayed`).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::frame::RenderedFrame;

/// Default capacity, matching the camera's burst tolerance.
pub const DEFAULT_BUFFER_CAPACITY: usize = 21;

struct BufferState {
    frames: VecDeque<RenderedFrame>,
    closed: bool,
}

pub struct FrameBuffer {
    state: Mutex<BufferState>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl FrameBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(BufferState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a frame, blocking while the buffer is full.
    pub fn enqueue(&self, frame: RenderedFrame) -> Result<(), PipelineError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PipelineError::BufferClosed);
            }
            if state.frames.len() < self.capacity {
                break;
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.frames.push_back(frame);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append without blocking. A full buffer hands the frame back.
    pub fn try_enqueue(&self, frame: RenderedFrame) -> Result<(), TryEnqueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TryEnqueueError::Closed(frame));
        }
        if state.frames.len() >= self.capacity {
            return Err(TryEnqueueError::Full(frame));
        }
        state.frames.push_back(frame);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest frame, blocking while empty.
    ///
    /// Fails with `BufferClosed` once the buffer is closed *and* drained.
    pub fn dequeue(&self) -> Result<RenderedFrame, PipelineError> {
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(frame);
            }
            if state.closed {
                return Err(PipelineError::BufferClosed);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Remove the oldest frame, waiting at most `timeout`. `Ok(None)` on timeout.
    pub fn dequeue_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<RenderedFrame>, PipelineError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(Some(frame));
            }
            if state.closed {
                return Err(PipelineError::BufferClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
    }

    /// Remove the oldest frame if one is queued. Never blocks, never fails.
    pub fn try_dequeue(&self) -> Option<RenderedFrame> {
        let frame = self.lock().frames.pop_front();
        if frame.is_some() {
            self.not_full.notify_one();
        }
        frame
    }

    /// Shut the buffer down and wake every waiter.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        log::debug!(
            "frame buffer closed with {} frame(s) still queued",
            state.frames.len()
        );
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Re-arm a closed buffer for a new stream. Leftover frames are kept.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Rejected non-blocking enqueue; the frame is returned to the caller.
#[derive(Debug)]
pub enum TryEnqueueError {
    Full(RenderedFrame),
    Closed(RenderedFrame),
}

impl TryEnqueueError {
    pub fn into_frame(self) -> RenderedFrame {
        match self {
            TryEnqueueError::Full(frame) | TryEnqueueError::Closed(frame) => frame,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameProcessor, RawFrame, VisibleImage};
    use std::sync::Arc;
    use std::thread;

    fn make_frame(sequence: u64) -> RenderedFrame {
        let raw = RawFrame::new(
            vec![36.0; 4],
            2,
            2,
            VisibleImage::Rgb {
                width: 1,
                height: 1,
                pixels: vec![0, 0, 0],
            },
        )
        .with_sequence(sequence);
        FrameProcessor::default().process(raw).expect("process")
    }

    fn fill(buffer: &FrameBuffer, count: u64) {
        for i in 0..count {
            buffer.enqueue(make_frame(i)).expect("enqueue");
        }
    }

    #[test]
    fn drains_in_fifo_order() {
        let buffer = FrameBuffer::with_default_capacity();
        fill(&buffer, 10);
        let order: Vec<u64> = std::iter::from_fn(|| buffer.try_dequeue())
            .map(|f| f.sequence())
            .collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_capacity() {
        let buffer = FrameBuffer::with_default_capacity();
        fill(&buffer, DEFAULT_BUFFER_CAPACITY as u64);
        assert_eq!(buffer.len(), DEFAULT_BUFFER_CAPACITY);

        let rejected = buffer.try_enqueue(make_frame(99)).unwrap_err();
        assert!(matches!(rejected, TryEnqueueError::Full(_)));
        assert_eq!(rejected.into_frame().sequence(), 99);
        assert_eq!(buffer.len(), DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn blocked_producer_resumes_when_consumer_drains() {
        let buffer = Arc::new(FrameBuffer::new(2));
        fill(&buffer, 2);

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.enqueue(make_frame(2)))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.try_dequeue().map(|f| f.sequence()), Some(0));
        producer.join().expect("producer thread").expect("enqueue");
        assert_eq!(buffer.len(), 2);
        assert!(buffer.len() <= buffer.capacity());
    }

    #[test]
    fn close_releases_blocked_producer_and_keeps_queue_drainable() {
        let buffer = Arc::new(FrameBuffer::with_default_capacity());
        fill(&buffer, DEFAULT_BUFFER_CAPACITY as u64);

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let result = buffer.enqueue(make_frame(100));
                (result, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        buffer.close();

        let (result, waited) = producer.join().expect("producer thread");
        assert_eq!(result, Err(PipelineError::BufferClosed));
        assert!(waited < Duration::from_secs(5));

        let mut drained = 0;
        while let Ok(frame) = buffer.dequeue() {
            assert_eq!(frame.sequence(), drained);
            drained += 1;
        }
        assert_eq!(drained, DEFAULT_BUFFER_CAPACITY as u64);
        assert_eq!(buffer.dequeue().unwrap_err(), PipelineError::BufferClosed);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let buffer = Arc::new(FrameBuffer::new(4));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.dequeue().map(|f| f.sequence()))
        };
        thread::sleep(Duration::from_millis(50));
        buffer.close();
        assert_eq!(
            consumer.join().expect("consumer thread"),
            Err(PipelineError::BufferClosed)
        );
    }

    #[test]
    fn dequeue_timeout_returns_none_when_idle() {
        let buffer = FrameBuffer::new(4);
        let result = buffer
            .dequeue_timeout(Duration::from_millis(20))
            .expect("open buffer");
        assert!(result.is_none());

        fill(&buffer, 1);
        let frame = buffer
            .dequeue_timeout(Duration::from_millis(20))
            .expect("open buffer");
        assert_eq!(frame.map(|f| f.sequence()), Some(0));
    }

    #[test]
    fn reopen_accepts_frames_again() {
        let buffer = FrameBuffer::new(4);
        buffer.close();
        assert_eq!(
            buffer.enqueue(make_frame(0)),
            Err(PipelineError::BufferClosed)
        );
        buffer.reopen();
        assert!(!buffer.is_closed());
        buffer.enqueue(make_frame(1)).expect("enqueue after reopen");
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let buffer = FrameBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}

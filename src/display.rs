//! Display consumer.
//!
//! `DisplayPump` drains the frame buffer one frame per refresh tick (FIFO) and
//! hands each frame to a `DisplaySink`. After a frame is shown it becomes the
//! `LastDisplayed` frame, which is the only thing the uploader ever reads.
//!
//! The pump polls instead of blocking so the refresh loop is never stalled by
//! an idle camera.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::buffer::FrameBuffer;
use crate::frame::RenderedFrame;

/// Default refresh tick of the display loop.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(33);

/// Something that shows frames.
pub trait DisplaySink: Send {
    fn show(&mut self, frame: &RenderedFrame);
}

/// Most recently displayed frame, shared read-only with the uploader.
#[derive(Clone, Default)]
pub struct LastDisplayed {
    frame: Arc<RwLock<Option<Arc<RenderedFrame>>>>,
    shown: Arc<AtomicU64>,
}

impl LastDisplayed {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, frame: Arc<RenderedFrame>) {
        let mut slot = self
            .frame
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(frame);
        self.shown.fetch_add(1, Ordering::SeqCst);
    }

    pub fn latest(&self) -> Option<Arc<RenderedFrame>> {
        self.frame
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether any frame has been displayed yet.
    pub fn has_frame(&self) -> bool {
        self.shown_count() > 0
    }

    pub fn shown_count(&self) -> u64 {
        self.shown.load(Ordering::SeqCst)
    }
}

pub struct DisplayPump {
    buffer: Arc<FrameBuffer>,
    last: LastDisplayed,
    sink: Box<dyn DisplaySink>,
}

impl DisplayPump {
    pub fn new(buffer: Arc<FrameBuffer>, last: LastDisplayed, sink: Box<dyn DisplaySink>) -> Self {
        Self { buffer, last, sink }
    }

    /// One refresh tick: show the oldest queued frame, if any.
    pub fn refresh(&mut self) -> bool {
        let Some(frame) = self.buffer.try_dequeue() else {
            return false;
        };
        log::trace!("display: frame #{}, {} queued", frame.sequence(), self.buffer.len());
        self.sink.show(&frame);
        self.last.publish(Arc::new(frame));
        true
    }

    /// Run the refresh loop on its own thread.
    pub fn spawn(mut self, refresh_interval: Duration) -> Result<DisplayHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("display".to_string())
            .spawn(move || {
                while !shutdown_thread.load(Ordering::SeqCst) {
                    if !self.refresh() {
                        std::thread::sleep(refresh_interval);
                    }
                }
            })?;
        Ok(DisplayHandle {
            shutdown,
            join: Some(join),
        })
    }
}

pub struct DisplayHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DisplayHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("display thread panicked"))?;
        }
        Ok(())
    }
}

/// Sink that reports each frame to the log.
#[derive(Debug, Default)]
pub struct LogDisplaySink {
    shown: u64,
    every: u64,
}

impl LogDisplaySink {
    /// Log one line every `every` frames.
    pub fn new(every: u64) -> Self {
        Self {
            shown: 0,
            every: every.max(1),
        }
    }
}

impl DisplaySink for LogDisplaySink {
    fn show(&mut self, frame: &RenderedFrame) {
        self.shown += 1;
        if self.shown % self.every.max(1) != 0 {
            return;
        }
        let (tw, th) = frame.thermal_image().dimensions();
        match frame.summary() {
            Some(summary) => log::info!(
                "frame #{} thermal {}x{} observed {:.1}..{:.1} C (mean {:.1}), clamp {:.0}..{:.0} C",
                frame.sequence(),
                tw,
                th,
                summary.min_c,
                summary.max_c,
                summary.mean_c,
                frame.min_temp(),
                frame.max_temp()
            ),
            None => log::info!(
                "frame #{} thermal {}x{} (no finite samples)",
                frame.sequence(),
                tw,
                th
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameProcessor, RawFrame, VisibleImage};
    use std::sync::Mutex;

    struct Recording(Arc<Mutex<Vec<u64>>>);

    impl DisplaySink for Recording {
        fn show(&mut self, frame: &RenderedFrame) {
            self.0.lock().unwrap().push(frame.sequence());
        }
    }

    fn make_frame(sequence: u64) -> RenderedFrame {
        let raw = RawFrame::new(
            vec![33.0; 4],
            2,
            2,
            VisibleImage::Rgb {
                width: 1,
                height: 1,
                pixels: vec![1, 2, 3],
            },
        )
        .with_sequence(sequence);
        FrameProcessor::default().process(raw).expect("process")
    }

    #[test]
    fn refresh_shows_frames_in_order_and_tracks_latest() {
        let buffer = Arc::new(FrameBuffer::new(8));
        for i in 1..=3 {
            buffer.enqueue(make_frame(i)).expect("enqueue");
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let last = LastDisplayed::new();
        let mut pump = DisplayPump::new(
            buffer.clone(),
            last.clone(),
            Box::new(Recording(seen.clone())),
        );

        assert!(!last.has_frame());
        assert!(pump.refresh());
        assert_eq!(last.latest().map(|f| f.sequence()), Some(1));
        assert!(pump.refresh());
        assert!(pump.refresh());
        assert!(!pump.refresh());

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(last.latest().map(|f| f.sequence()), Some(3));
        assert_eq!(last.shown_count(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn spawned_pump_drains_buffer() {
        let buffer = Arc::new(FrameBuffer::new(8));
        let last = LastDisplayed::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = DisplayPump::new(
            buffer.clone(),
            last.clone(),
            Box::new(Recording(seen.clone())),
        )
        .spawn(Duration::from_millis(1))
        .expect("spawn");

        for i in 0..5 {
            buffer.enqueue(make_frame(i)).expect("enqueue");
        }
        for _ in 0..500 {
            if last.shown_count() == 5 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        handle.stop().expect("stop");
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}

//! Single-slot frame mailbox shared between one capture worker and the
//! render loop. The producer always overwrites and never blocks; the
//! consumer drains the latest entry and never blocks; an empty slot is a
//! normal state, not an error.

use std::sync::Mutex;
use std::time::Instant;

use crate::client::Frame;

#[derive(Default)]
pub struct FrameSlot {
    inner: Mutex<Option<(Frame, Instant)>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame captured right now, evicting any unread one.
    pub fn put(&self, frame: Frame) {
        self.put_at(frame, Instant::now());
    }

    /// Store a frame with an explicit capture timestamp.
    pub fn put_at(&self, frame: Frame, captured: Instant) {
        *self.inner.lock().unwrap() = Some((frame, captured));
    }

    /// Remove and return the latest frame, if any.
    pub fn take(&self) -> Option<(Frame, Instant)> {
        self.inner.lock().unwrap().take()
    }

    /// Whether an unread frame is waiting. Feeds the capture worker's
    /// skip-ahead heuristic.
    pub fn is_occupied(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }
}

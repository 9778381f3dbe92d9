//! Per-camera capture engine.
//!
//! One worker thread per active camera; all blocking stream I/O stays on
//! that thread. The worker's lifecycle is an explicit state machine:
//!
//! ```text
//! Connecting -> Streaming -> (Stalled -> Reconnecting -> Streaming | Terminated)
//! ```
//!
//! Stopping is signal-and-forget: the controller flips an atomic flag and
//! moves on, the worker notices at its next loop check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::client::slot::FrameSlot;
use crate::client::source::{open_source, FrameSource};
use crate::Result;

/// Consecutive read failures before the stream counts as stalled.
pub const STALL_THRESHOLD: u32 = 50;
/// Window for the initial connection attempt.
pub const CONNECT_WINDOW: Duration = Duration::from_secs(10);
/// Pause before reopening a stalled stream.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Window for reopening after a stall.
pub const RECONNECT_WINDOW: Duration = Duration::from_secs(5);
/// Per-attempt timeout when opening a source.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Streaming,
    Stalled,
    Reconnecting,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    Opened,
    OpenFailed,
    FrameRead,
    ReadFailed { consecutive: u32 },
    ReopenStarted,
    ReopenSucceeded,
    ReopenFailed,
    Stopped,
}

/// Pure transition function driving the worker loop.
pub fn transition(state: WorkerState, event: WorkerEvent) -> WorkerState {
    use WorkerEvent as E;
    use WorkerState as S;

    match (state, event) {
        (_, E::Stopped) => S::Terminated,
        (S::Connecting, E::Opened) => S::Streaming,
        (S::Connecting, E::OpenFailed) => S::Terminated,
        (S::Streaming, E::FrameRead) => S::Streaming,
        (S::Streaming, E::ReadFailed { consecutive }) => {
            if consecutive > STALL_THRESHOLD {
                S::Stalled
            } else {
                S::Streaming
            }
        }
        (S::Stalled, E::ReopenStarted) => S::Reconnecting,
        (S::Reconnecting, E::ReopenSucceeded) => S::Streaming,
        (S::Reconnecting, E::ReopenFailed) => S::Terminated,
        (state, _) => state,
    }
}

/// How many frames to discard before keeping one. Reading ahead when the
/// slot still holds an unread frame keeps latency bounded by preferring the
/// newest frame over queued backlog.
pub fn frames_to_skip(slot_occupied: bool, frame_rate: f32) -> u32 {
    if slot_occupied {
        ((frame_rate / 10.0) as u32).max(2)
    } else {
        0
    }
}

/// Handle owned by the wall manager for one running capture worker.
pub struct CaptureHandle {
    pub camera_id: u32,
    stop: Arc<AtomicBool>,
    slot: Arc<FrameSlot>,
}

impl CaptureHandle {
    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    /// Signal the worker to stop. Does not wait for in-flight I/O; the
    /// thread self-terminates at its next loop check.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a capture worker. The stream URL is resolved inside the worker
/// thread so slow servers never block the caller.
pub fn spawn(
    camera_id: u32,
    camera_name: String,
    resolve_url: impl FnOnce() -> Result<String> + Send + 'static,
) -> CaptureHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let slot = Arc::new(FrameSlot::new());

    let worker_stop = Arc::clone(&stop);
    let worker_slot = Arc::clone(&slot);
    let builder = thread::Builder::new().name(format!("camera-{}", camera_id));
    let spawned = builder.spawn(move || {
        worker_loop(camera_id, &camera_name, resolve_url, worker_stop, worker_slot)
    });
    if let Err(e) = spawned {
        warn!("Cannot spawn worker for camera {}: {}", camera_id, e);
    }

    CaptureHandle {
        camera_id,
        stop,
        slot,
    }
}

fn worker_loop(
    camera_id: u32,
    name: &str,
    resolve_url: impl FnOnce() -> Result<String>,
    stop: Arc<AtomicBool>,
    slot: Arc<FrameSlot>,
) {
    let url = match resolve_url() {
        Ok(url) => url,
        Err(e) => {
            // The cell keeps showing its placeholder; never fatal.
            warn!(camera = %name, "No stream URL: {}", e);
            return;
        }
    };

    info!(camera = %name, "Capture worker started");

    let mut state = WorkerState::Connecting;
    let mut source: Option<Box<dyn FrameSource>> = None;
    let mut consecutive_failures: u32 = 0;
    let mut frames: u64 = 0;
    let mut last_log = Instant::now();

    while state != WorkerState::Terminated {
        if stop.load(Ordering::SeqCst) {
            state = transition(state, WorkerEvent::Stopped);
            continue;
        }

        match state {
            WorkerState::Connecting => match open_with_retry(&url, CONNECT_WINDOW, &stop) {
                Some(opened) => {
                    info!(camera = %name, "Stream open ({:.0} fps nominal)", opened.frame_rate());
                    source = Some(opened);
                    state = transition(state, WorkerEvent::Opened);
                }
                None => {
                    warn!(camera = %name, "Cannot open stream within {:?}", CONNECT_WINDOW);
                    state = transition(state, WorkerEvent::OpenFailed);
                }
            },

            WorkerState::Streaming => {
                let Some(active) = source.as_mut() else {
                    state = transition(state, WorkerEvent::Stopped);
                    continue;
                };

                let skip = frames_to_skip(slot.is_occupied(), active.frame_rate());
                let mut latest = None;
                let mut failed = false;
                for _ in 0..=skip {
                    match active.read_frame() {
                        Ok(frame) => latest = Some(frame),
                        Err(e) => {
                            debug!(camera = %name, "Read failed: {}", e);
                            failed = true;
                            break;
                        }
                    }
                }

                if failed {
                    consecutive_failures += 1;
                    state = transition(
                        state,
                        WorkerEvent::ReadFailed {
                            consecutive: consecutive_failures,
                        },
                    );
                } else if let Some(frame) = latest {
                    consecutive_failures = 0;
                    frames += 1;
                    slot.put(frame);
                    state = transition(state, WorkerEvent::FrameRead);
                }

                if last_log.elapsed() > Duration::from_secs(30) {
                    debug!(camera = %name, "{} frames captured", frames);
                    last_log = Instant::now();
                }

                thread::sleep(if skip > 0 {
                    Duration::from_millis(1)
                } else {
                    Duration::from_millis(10)
                });
            }

            WorkerState::Stalled => {
                warn!(camera = %name, "Stream stalled after {} failed reads", consecutive_failures);
                source = None; // release the connection before reopening
                state = transition(state, WorkerEvent::ReopenStarted);
            }

            WorkerState::Reconnecting => {
                sleep_with_stop(RECONNECT_DELAY, &stop);
                match open_with_retry(&url, RECONNECT_WINDOW, &stop) {
                    Some(opened) => {
                        info!(camera = %name, "Reconnected");
                        source = Some(opened);
                        consecutive_failures = 0;
                        state = transition(state, WorkerEvent::ReopenSucceeded);
                    }
                    None => {
                        warn!(camera = %name, "Reconnect failed, giving up");
                        state = transition(state, WorkerEvent::ReopenFailed);
                    }
                }
            }

            WorkerState::Terminated => {}
        }
    }

    info!(camera = %name, "Capture worker stopped after {} frames", frames);
}

/// Try opening the source until it yields a first frame or the window
/// closes. The probe frame is discarded.
fn open_with_retry(
    url: &str,
    window: Duration,
    stop: &AtomicBool,
) -> Option<Box<dyn FrameSource>> {
    let deadline = Instant::now() + window;
    loop {
        if stop.load(Ordering::SeqCst) {
            return None;
        }
        match open_source(url, OPEN_TIMEOUT) {
            Ok(mut source) => match source.read_frame() {
                Ok(_) => return Some(source),
                Err(e) => debug!("Probe read failed: {}", e),
            },
            Err(e) => debug!("Open failed: {}", e),
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep_with_stop(Duration::from_secs(1), stop);
    }
}

fn sleep_with_stop(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerEvent as E;
    use WorkerState as S;

    #[test]
    fn happy_path_transitions() {
        let mut state = S::Connecting;
        state = transition(state, E::Opened);
        assert_eq!(state, S::Streaming);
        state = transition(state, E::FrameRead);
        assert_eq!(state, S::Streaming);
    }

    #[test]
    fn failures_below_threshold_keep_streaming() {
        let state = transition(
            S::Streaming,
            E::ReadFailed {
                consecutive: STALL_THRESHOLD,
            },
        );
        assert_eq!(state, S::Streaming);
    }

    #[test]
    fn exceeding_threshold_stalls_then_recovers_or_dies() {
        let stalled = transition(
            S::Streaming,
            E::ReadFailed {
                consecutive: STALL_THRESHOLD + 1,
            },
        );
        assert_eq!(stalled, S::Stalled);

        let reconnecting = transition(stalled, E::ReopenStarted);
        assert_eq!(reconnecting, S::Reconnecting);

        assert_eq!(transition(reconnecting, E::ReopenSucceeded), S::Streaming);
        assert_eq!(transition(reconnecting, E::ReopenFailed), S::Terminated);
    }

    #[test]
    fn open_failure_terminates() {
        assert_eq!(transition(S::Connecting, E::OpenFailed), S::Terminated);
    }

    #[test]
    fn stop_wins_from_every_state() {
        for state in [
            S::Connecting,
            S::Streaming,
            S::Stalled,
            S::Reconnecting,
            S::Terminated,
        ] {
            assert_eq!(transition(state, E::Stopped), S::Terminated);
        }
    }

    #[test]
    fn skip_ahead_scales_with_frame_rate() {
        assert_eq!(frames_to_skip(false, 25.0), 0);
        assert_eq!(frames_to_skip(true, 25.0), 2);
        assert_eq!(frames_to_skip(true, 60.0), 6);
        // Low-rate streams still skip a minimum of two.
        assert_eq!(frames_to_skip(true, 10.0), 2);
    }

    #[test]
    fn worker_with_unresolvable_url_exits_quietly() {
        let handle = spawn(9, "test".to_string(), || {
            Err(crate::WallError::Network("no server".to_string()))
        });
        // The worker never produces a frame and simply terminates.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.slot().is_occupied());
    }

    #[test]
    fn stop_flag_prevents_connection_attempts() {
        let handle = spawn(9, "test".to_string(), || {
            Ok("ftp://nowhere/stream".to_string())
        });
        handle.stop();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.slot().is_occupied());
    }
}

//! Fixed-rate mosaic compositor.
//!
//! Runs on its own thread with sleep-to-target pacing. Each tick samples
//! every active camera's frame slot, applies the freshness window with a
//! per-camera last-valid fallback, and scales the cells into one mosaic
//! frame handed to the configured sink.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{imageops, RgbImage};
use tracing::{debug, info};

use crate::client::sink::MosaicSink;
use crate::client::slot::FrameSlot;
use crate::client::Frame;
use crate::{CameraSlots, Layout, Quadrant};

pub(crate) const BORDER: u32 = 2;
pub(crate) const BORDER_COLOR: [u8; 3] = [50, 50, 50];
pub(crate) const EMPTY_CELL_FILL: [u8; 3] = [16, 16, 16];
pub(crate) const LOADING_CELL_FILL: [u8; 3] = [8, 8, 12];

#[derive(Debug, Clone)]
pub struct CompositorConfig {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub max_frame_age: Duration,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            target_fps: 25,
            max_frame_age: Duration::from_millis(200),
        }
    }
}

/// Snapshot of the wall state the render loop works from each tick.
#[derive(Clone, Default)]
pub struct WallView {
    pub layout: Option<Layout>,
    pub cameras: CameraSlots,
    pub video_wall_mode: bool,
    pub quadrant: Option<Quadrant>,
    /// Bumped on every layout change; forces a full fallback reset.
    pub epoch: u64,
    pub slots: HashMap<u32, Arc<FrameSlot>>,
}

pub struct Compositor {
    config: CompositorConfig,
    last_valid: HashMap<u32, Frame>,
    epoch_seen: u64,
    frames_composed: u64,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self {
            config,
            last_valid: HashMap::new(),
            epoch_seen: 0,
            frames_composed: 0,
        }
    }

    /// Run the render loop until `stop` flips. `view` is sampled once per
    /// tick and must be cheap.
    pub fn run(
        mut self,
        view: impl Fn() -> WallView,
        sink: &mut dyn MosaicSink,
        stop: Arc<AtomicBool>,
    ) {
        let fps = self.config.target_fps.max(1);
        let interval = Duration::from_secs_f64(1.0 / fps as f64);
        let mut last_log = Instant::now();
        info!("Render loop started at {} fps", fps);

        while !stop.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            let frame = self.compose(&view(), tick_start);
            if let Err(e) = sink.present(&frame) {
                debug!("Sink error: {}", e);
            }

            if last_log.elapsed() > Duration::from_secs(30) {
                info!("{} mosaic frames displayed", self.frames_composed);
                last_log = Instant::now();
            }

            // Sleep to target; late ticks just start the next one, frames
            // are never dropped here.
            let elapsed = tick_start.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }

        info!("Render loop stopped after {} frames", self.frames_composed);
    }

    /// Compose one mosaic tick.
    pub fn compose(&mut self, view: &WallView, now: Instant) -> Frame {
        if view.epoch != self.epoch_seen {
            // A layout change restarts every worker; stale fallbacks from
            // the previous arrangement must not bleed through.
            self.last_valid.clear();
            self.epoch_seen = view.epoch;
        }

        let active: HashSet<u32> = view.cameras.iter().flatten().copied().collect();
        self.last_valid.retain(|camera_id, _| active.contains(camera_id));

        self.frames_composed += 1;

        let layout = match view.layout {
            Some(layout) if !active.is_empty() => layout,
            // Nothing assigned: idle screen.
            _ => return Frame::solid(self.config.width, self.config.height, [0, 0, 0]),
        };

        let (rows, cols) = layout.grid();
        let cell_w = self.config.width / cols as u32;
        let cell_h = self.config.height / rows as u32;
        let mut mosaic = RgbImage::new(self.config.width, self.config.height);

        for index in 0..layout.cells().min(view.cameras.len()) {
            let x0 = (index % cols) as u32 * cell_w;
            let y0 = (index / cols) as u32 * cell_h;

            let Some(camera_id) = view.cameras[index] else {
                draw_cell(&mut mosaic, x0, y0, cell_w, cell_h, EMPTY_CELL_FILL);
                continue;
            };

            match self.frame_for(camera_id, view.slots.get(&camera_id), now) {
                Some(frame) => {
                    let shown = if view.video_wall_mode && layout == Layout::OneByOne {
                        match view.quadrant {
                            Some(quadrant) => crop_quadrant(&frame, quadrant),
                            None => frame,
                        }
                    } else {
                        frame
                    };
                    blit_cell(&mut mosaic, &shown.image, x0, y0, cell_w, cell_h);
                }
                None => draw_cell(&mut mosaic, x0, y0, cell_w, cell_h, LOADING_CELL_FILL),
            }
        }

        Frame { image: mosaic }
    }

    /// Latest slot frame if it is fresh enough, else the remembered
    /// last-valid frame, else nothing (the caller shows a placeholder).
    fn frame_for(
        &mut self,
        camera_id: u32,
        slot: Option<&Arc<FrameSlot>>,
        now: Instant,
    ) -> Option<Frame> {
        if let Some(slot) = slot {
            if let Some((frame, captured)) = slot.take() {
                if now.duration_since(captured) < self.config.max_frame_age {
                    self.last_valid.insert(camera_id, frame.clone());
                    return Some(frame);
                }
                // Too old to show; keep whatever was last good instead.
            }
        }
        self.last_valid.get(&camera_id).cloned()
    }
}

/// Crop the quadrant of a full frame this node shows as its wall share.
pub fn crop_quadrant(frame: &Frame, quadrant: Quadrant) -> Frame {
    let (w, h) = frame.image.dimensions();
    let (half_w, half_h) = (w / 2, h / 2);
    let (x, y, cw, ch) = match quadrant {
        Quadrant::TopLeft => (0, 0, half_w, half_h),
        Quadrant::TopRight => (half_w, 0, w - half_w, half_h),
        Quadrant::BottomLeft => (0, half_h, half_w, h - half_h),
        Quadrant::BottomRight => (half_w, half_h, w - half_w, h - half_h),
    };
    Frame {
        image: imageops::crop_imm(&frame.image, x, y, cw.max(1), ch.max(1)).to_image(),
    }
}

fn blit_cell(mosaic: &mut RgbImage, image: &RgbImage, x0: u32, y0: u32, cell_w: u32, cell_h: u32) {
    let inner_w = cell_w.saturating_sub(2 * BORDER).max(1);
    let inner_h = cell_h.saturating_sub(2 * BORDER).max(1);
    let resized = imageops::resize(image, inner_w, inner_h, imageops::FilterType::Triangle);
    imageops::replace(
        mosaic,
        &resized,
        (x0 + BORDER) as i64,
        (y0 + BORDER) as i64,
    );
}

fn draw_cell(mosaic: &mut RgbImage, x0: u32, y0: u32, cell_w: u32, cell_h: u32, fill: [u8; 3]) {
    let (width, height) = mosaic.dimensions();
    for y in y0..(y0 + cell_h).min(height) {
        for x in x0..(x0 + cell_w).min(width) {
            let on_border = x - x0 < BORDER
                || y - y0 < BORDER
                || (x0 + cell_w - 1) - x < BORDER
                || (y0 + cell_h - 1) - y < BORDER;
            let color = if on_border { BORDER_COLOR } else { fill };
            mosaic.put_pixel(x, y, image::Rgb(color));
        }
    }
}

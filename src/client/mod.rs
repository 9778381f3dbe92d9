//! Display-node client.
//!
//! Holds the wall state (layout, camera assignment, capture workers) and
//! wires the control channel, the capture engine and the compositor
//! together. Worker start/stop on configuration changes is computed by a
//! pure diffing function so the rules are testable on their own: a layout
//! change restarts every worker, a camera-set change under the same layout
//! touches exactly the added and removed cameras.

pub mod capture;
pub mod compositor;
pub mod control;
pub mod sink;
pub mod slot;
pub mod source;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::UdpSocket;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::protocol::ConfigUpdate;
use crate::{CameraSlots, Layout, Quadrant, Result, WallError};

use capture::CaptureHandle;
use compositor::{Compositor, CompositorConfig, WallView};
use control::ControlChannelConfig;
use sink::MosaicSink;

/// One decoded video frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
}

impl Frame {
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(color)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({}x{})", self.width(), self.height())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub name: Option<String>,
    pub target_fps: u32,
    pub max_frame_age_ms: u64,
    pub reconnect_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub screen_width: u32,
    pub screen_height: u32,
    /// 0 disables the MJPEG preview server.
    pub preview_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:1982".to_string(),
            name: None,
            target_fps: 25,
            max_frame_age_ms: 200,
            reconnect_interval_secs: 10,
            heartbeat_interval_secs: 30,
            screen_width: 1920,
            screen_height: 1080,
            preview_port: 0,
        }
    }
}

impl ClientConfig {
    /// Load from an optional JSON file; any problem falls back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => {
                    info!("Configuration loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Cannot parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// Worker changes required to move from one configuration to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub layout_changed: bool,
    pub stop: Vec<u32>,
    pub start: Vec<u32>,
}

/// Pure diff between the current and the incoming assignment.
pub fn plan_update(
    old_layout: Option<Layout>,
    old_slots: &CameraSlots,
    new_layout: Layout,
    new_slots: &CameraSlots,
) -> UpdatePlan {
    let old_set: BTreeSet<u32> = old_slots.iter().flatten().copied().collect();
    let new_set: BTreeSet<u32> = new_slots.iter().flatten().copied().collect();
    let layout_changed = old_layout != Some(new_layout);

    let (stop, start) = if layout_changed {
        // Full reset: every worker goes down, every camera comes back up.
        (
            old_set.iter().copied().collect(),
            new_set.iter().copied().collect(),
        )
    } else {
        (
            old_set.difference(&new_set).copied().collect(),
            new_set.difference(&old_set).copied().collect(),
        )
    };

    UpdatePlan {
        layout_changed,
        stop,
        start,
    }
}

/// Current wall state plus the live capture workers.
#[derive(Default)]
pub struct Wall {
    layout: Option<Layout>,
    cameras: CameraSlots,
    video_wall_mode: bool,
    quadrant: Option<Quadrant>,
    epoch: u64,
    workers: HashMap<u32, CaptureHandle>,
}

impl Wall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a config push. `spawn` is called for each camera that needs a
    /// new worker; removed workers are signalled and dropped without
    /// waiting for their in-flight I/O.
    pub fn apply_config(
        &mut self,
        update: ConfigUpdate,
        spawn: impl Fn(u32, Layout) -> CaptureHandle,
    ) {
        let plan = plan_update(self.layout, &self.cameras, update.layout, &update.cameras);

        if !plan.stop.is_empty() {
            info!("Stopping camera worker(s): {:?}", plan.stop);
        }
        for camera_id in &plan.stop {
            if let Some(handle) = self.workers.remove(camera_id) {
                handle.stop();
            }
        }

        self.layout = Some(update.layout);
        self.cameras = update.cameras;
        self.video_wall_mode = update.video_wall_mode;
        self.quadrant = update.quadrant;
        if plan.layout_changed {
            self.epoch += 1;
        }
        if update.video_wall_mode {
            info!("Video wall mode on, quadrant {:?}", update.quadrant);
        }

        if !plan.start.is_empty() {
            info!("Starting camera worker(s): {:?}", plan.start);
        }
        for camera_id in &plan.start {
            self.workers
                .insert(*camera_id, spawn(*camera_id, update.layout));
        }
    }

    /// Cheap snapshot for the render loop.
    pub fn view(&self) -> WallView {
        WallView {
            layout: self.layout,
            cameras: self.cameras.clone(),
            video_wall_mode: self.video_wall_mode,
            quadrant: self.quadrant,
            epoch: self.epoch,
            slots: self
                .workers
                .iter()
                .map(|(camera_id, handle)| (*camera_id, handle.slot()))
                .collect(),
        }
    }

    pub fn active_workers(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

pub struct DisplayClient {
    config: ClientConfig,
}

impl DisplayClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Run until the control-update channel dies (which it never does in
    /// normal operation; the control task reconnects forever).
    pub async fn run(self, mut mosaic_sink: Box<dyn MosaicSink>) -> Result<()> {
        let config = self.config;
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| "wallcast-display".to_string());

        info!("Display node '{}' starting", name);

        // Camera names make the logs readable; running without them is fine.
        let camera_names = fetch_camera_names(&config.server_url).await;

        let wall = Arc::new(Mutex::new(Wall::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let compositor = Compositor::new(CompositorConfig {
            width: config.screen_width,
            height: config.screen_height,
            target_fps: config.target_fps,
            max_frame_age: Duration::from_millis(config.max_frame_age_ms),
        });
        let render_wall = Arc::clone(&wall);
        let render_stop = Arc::clone(&stop);
        let render = std::thread::Builder::new()
            .name("compositor".to_string())
            .spawn(move || {
                compositor.run(
                    move || render_wall.lock().unwrap().view(),
                    mosaic_sink.as_mut(),
                    render_stop,
                );
            })?;

        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let control_config = ControlChannelConfig {
            server_url: config.server_url.clone(),
            name,
            ip: local_ip(),
            reconnect_interval: Duration::from_secs(config.reconnect_interval_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            register_reply_window: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        };
        tokio::spawn(control::run(control_config, updates_tx));

        while let Some(update) = updates_rx.recv().await {
            let server_url = config.server_url.clone();
            let names = camera_names.clone();
            // The spawn closure only launches a thread; URL resolution and
            // stream I/O happen on the worker, never under this lock.
            let mut wall = wall.lock().unwrap();
            wall.apply_config(update, move |camera_id, layout| {
                let server_url = server_url.clone();
                let label = names
                    .get(&camera_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Camera {}", camera_id));
                capture::spawn(camera_id, label, move || {
                    resolve_stream_url(&server_url, camera_id, layout)
                })
            });
        }

        stop.store(true, Ordering::SeqCst);
        let _ = render.join();
        Ok(())
    }
}

/// Ask the server which concrete URL this camera should be opened with for
/// the given layout. Runs on a capture worker thread.
fn resolve_stream_url(server_url: &str, camera_id: u32, layout: Layout) -> Result<String> {
    #[derive(Deserialize)]
    struct UrlReply {
        url: String,
    }

    let endpoint = format!(
        "{}/api/rtsp/{}?layout={}",
        server_url.trim_end_matches('/'),
        camera_id,
        layout
    );
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| WallError::Network(e.to_string()))?;

    let response = client
        .get(&endpoint)
        .send()
        .map_err(|e| WallError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(WallError::Network(format!(
            "HTTP {} resolving stream url for camera {}",
            response.status(),
            camera_id
        )));
    }

    let reply: UrlReply = response
        .json()
        .map_err(|e| WallError::Network(e.to_string()))?;
    Ok(reply.url)
}

async fn fetch_camera_names(server_url: &str) -> HashMap<u32, String> {
    #[derive(Deserialize)]
    struct CameraEntry {
        id: u32,
        #[serde(default)]
        name: String,
    }

    let endpoint = format!("{}/api/cameras", server_url.trim_end_matches('/'));
    let cameras: Vec<CameraEntry> = match reqwest::get(&endpoint).await {
        Ok(response) => response.json().await.unwrap_or_default(),
        Err(e) => {
            warn!("Cannot load camera list: {}", e);
            Vec::new()
        }
    };

    info!("Loaded {} camera descriptions", cameras.len());
    cameras
        .into_iter()
        .map(|cam| {
            let name = if cam.name.is_empty() {
                format!("Camera {}", cam.id)
            } else {
                cam.name
            };
            (cam.id, name)
        })
        .collect()
}

/// Best-effort local address for registration, the UDP-connect trick.
fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_handle(camera_id: u32) -> CaptureHandle {
        // Worker exits immediately: URL resolution fails on purpose.
        capture::spawn(camera_id, format!("Camera {}", camera_id), || {
            Err(WallError::Network("test worker".to_string()))
        })
    }

    #[test]
    fn camera_swap_touches_only_the_difference() {
        let plan = plan_update(
            Some(Layout::TwoByTwo),
            &vec![Some(1), Some(2), None, None],
            Layout::TwoByTwo,
            &vec![Some(1), Some(3), None, None],
        );
        assert!(!plan.layout_changed);
        assert_eq!(plan.stop, vec![2]);
        assert_eq!(plan.start, vec![3]);
    }

    #[test]
    fn layout_change_restarts_everything() {
        let plan = plan_update(
            Some(Layout::TwoByTwo),
            &vec![Some(1), Some(2), None, None],
            Layout::ThreeByThree,
            &vec![Some(1), Some(2), None, None, None, None, None, None, None],
        );
        assert!(plan.layout_changed);
        assert_eq!(plan.stop, vec![1, 2]);
        assert_eq!(plan.start, vec![1, 2]);
    }

    #[test]
    fn identical_config_is_a_no_op() {
        let plan = plan_update(
            Some(Layout::OneByOne),
            &vec![Some(4)],
            Layout::OneByOne,
            &vec![Some(4)],
        );
        assert!(!plan.layout_changed);
        assert!(plan.stop.is_empty());
        assert!(plan.start.is_empty());
    }

    #[test]
    fn reshuffled_slots_keep_workers_alive() {
        // Same cameras, different cells: nothing restarts.
        let plan = plan_update(
            Some(Layout::TwoByTwo),
            &vec![Some(1), Some(2), None, None],
            Layout::TwoByTwo,
            &vec![None, Some(2), Some(1), None],
        );
        assert!(plan.stop.is_empty());
        assert!(plan.start.is_empty());
    }

    #[test]
    fn wall_applies_plan_and_bumps_epoch_on_layout_change() {
        let mut wall = Wall::new();

        wall.apply_config(
            ConfigUpdate::plain(Layout::TwoByTwo, vec![Some(1), Some(2), None, None]),
            |id, _| fake_handle(id),
        );
        assert_eq!(wall.active_workers(), vec![1, 2]);
        let epoch_after_first = wall.epoch();

        // Camera swap, same layout: epoch stays put, workers diff applies.
        wall.apply_config(
            ConfigUpdate::plain(Layout::TwoByTwo, vec![Some(1), Some(3), None, None]),
            |id, _| fake_handle(id),
        );
        assert_eq!(wall.active_workers(), vec![1, 3]);
        assert_eq!(wall.epoch(), epoch_after_first);

        // Layout change with an identical camera set still restarts all.
        wall.apply_config(
            ConfigUpdate::plain(
                Layout::ThreeByThree,
                vec![Some(1), Some(3), None, None, None, None, None, None, None],
            ),
            |id, _| fake_handle(id),
        );
        assert_eq!(wall.active_workers(), vec![1, 3]);
        assert_eq!(wall.epoch(), epoch_after_first + 1);
    }

    #[test]
    fn view_exposes_slots_for_running_workers() {
        let mut wall = Wall::new();
        wall.apply_config(
            ConfigUpdate::plain(Layout::OneByOne, vec![Some(9)]),
            |id, _| fake_handle(id),
        );
        let view = wall.view();
        assert_eq!(view.layout, Some(Layout::OneByOne));
        assert!(view.slots.contains_key(&9));
        assert_eq!(view.epoch, wall.epoch());
    }

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::load(None);
        assert_eq!(config.server_url, "http://localhost:1982");
        assert_eq!(config.target_fps, 25);
        assert_eq!(config.max_frame_age_ms, 200);
    }

    #[test]
    fn client_config_file_overrides() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server_url": "http://10.0.0.2:1982", "target_fps": 30}}"#
        )
        .unwrap();

        let config = ClientConfig::load(Some(file.path()));
        assert_eq!(config.server_url, "http://10.0.0.2:1982");
        assert_eq!(config.target_fps, 30);
        // Unspecified fields keep their defaults.
        assert_eq!(config.heartbeat_interval_secs, 30);
    }
}

//! Read-only camera capability store.
//!
//! Loaded once at startup from a JSON file maintained by the capability
//! probing utility; the server never mutates it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::Layout;

/// Per-layout override block: any field present here wins over the
/// built-in layout defaults when building a stream URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub channel: Option<u32>,
    #[serde(default)]
    pub stream: Option<u32>,
    #[serde(default)]
    pub stream_resolution: Option<String>,
    #[serde(default)]
    pub stream_fps: Option<u32>,
    #[serde(default)]
    pub quality: Option<String>,
    /// URL template with `{login}`/`{password}`/`{ip}`/`{port}`/`{channel}`/
    /// `{stream}`/`{resolution}`/`{fps}`/`{quality}` placeholders. Absent for
    /// cameras using the fixed vendor URL.
    #[serde(default)]
    pub rtsp_template: Option<String>,
    #[serde(default)]
    pub layout_config: HashMap<Layout, StreamOverrides>,
    #[serde(default)]
    pub supported_resolutions: Vec<String>,
    #[serde(default)]
    pub high_quality: Option<String>,
    #[serde(default)]
    pub low_quality: Option<String>,
    #[serde(default)]
    pub main_stream: Option<u32>,
    #[serde(default)]
    pub sub_stream: Option<u32>,
    #[serde(default)]
    pub main_channel: Option<u32>,
    #[serde(default)]
    pub sub_channel: Option<u32>,
    #[serde(default)]
    pub sub_resolution: Option<String>,
}

fn default_port() -> u16 {
    554
}

impl Camera {
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("Camera {}", self.id)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CameraFile {
    #[serde(default)]
    cameras: Vec<Camera>,
}

pub struct CameraStore {
    cameras: Vec<Camera>,
    index: HashMap<u32, usize>,
}

impl CameraStore {
    /// Load the capability list. A missing or unreadable file leaves the
    /// store empty; the server keeps running without cameras.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let cameras = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<CameraFile>(&raw) {
                Ok(file) => {
                    info!("Loaded {} cameras from {}", file.cameras.len(), path.display());
                    file.cameras
                }
                Err(e) => {
                    warn!("Cannot parse {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                Vec::new()
            }
        };
        Self::from_cameras(cameras)
    }

    pub fn from_cameras(cameras: Vec<Camera>) -> Self {
        let index = cameras
            .iter()
            .enumerate()
            .map(|(i, cam)| (cam.id, i))
            .collect();
        Self { cameras, index }
    }

    pub fn get(&self, id: u32) -> Option<&Camera> {
        self.index.get(&id).map(|&i| &self.cameras[i])
    }

    pub fn all(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

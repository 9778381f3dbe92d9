//! Named scene snapshots with JSON file persistence.
//!
//! A scene captures every connected node's layout and camera assignment,
//! keyed by persistent id so it can be re-applied after reconnects. The
//! store keeps the whole collection in memory and rewrites the file through
//! a temp-and-rename so a failed save never corrupts the previous scenes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::{CameraSlots, Layout, Position, Result, WallError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedScreen {
    pub name: String,
    pub layout: Layout,
    pub cameras: CameraSlots,
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneConfiguration {
    /// Keyed by persistent id.
    #[serde(default)]
    pub screens: HashMap<String, SavedScreen>,
    /// Keyed by persistent id.
    #[serde(default)]
    pub screen_positions: HashMap<String, Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub configuration: SceneConfiguration,
}

pub struct SceneStore {
    path: PathBuf,
    scenes: HashMap<String, Scene>,
}

impl SceneStore {
    /// Load all scenes; an absent or unreadable file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let scenes = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, Scene>>(&raw) {
                Ok(mut scenes) => {
                    for (id, scene) in scenes.iter_mut() {
                        scene.id = id.clone();
                    }
                    info!("Loaded {} scenes from {}", scenes.len(), path.display());
                    scenes
                }
                Err(e) => {
                    warn!("Cannot parse {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, scenes }
    }

    /// All scenes, most recently modified first.
    pub fn list(&self) -> Vec<Scene> {
        let mut scenes: Vec<Scene> = self.scenes.values().cloned().collect();
        scenes.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        scenes
    }

    pub fn get(&self, id: &str) -> Option<&Scene> {
        self.scenes.get(id)
    }

    pub fn insert(&mut self, scene: Scene) -> Result<()> {
        self.scenes.insert(scene.id.clone(), scene);
        self.save()
    }

    pub fn update_meta(
        &mut self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Scene> {
        let scene = self
            .scenes
            .get_mut(id)
            .ok_or_else(|| WallError::Scene("scene not found".to_string()))?;
        if let Some(name) = name {
            scene.name = name;
        }
        if let Some(description) = description {
            scene.description = description;
        }
        scene.modified_at = Utc::now();
        let updated = scene.clone();
        self.save()?;
        Ok(updated)
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        if self.scenes.remove(id).is_none() {
            return Err(WallError::Scene("scene not found".to_string()));
        }
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&self.scenes)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

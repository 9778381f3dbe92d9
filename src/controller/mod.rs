//! Layout and scene controller.
//!
//! Everything that mutates screen configuration goes through here: operator
//! config posts, position updates, and scene snapshots. Each operation takes
//! the registry write lock once, mutates, re-runs group detection and queues
//! config pushes before releasing it; pushes travel over in-memory channel
//! handles, so no lock is ever held across network I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::{ConfigUpdate, ServerEvent};
use crate::registry::{Registry, SessionId};
use crate::scenes::{SavedScreen, Scene, SceneConfiguration, SceneStore};
use crate::wall::detect_groups;
use crate::{normalize_slots, CameraSlots, Layout, Position, Result, WallError};

pub struct Controller {
    registry: Arc<RwLock<Registry>>,
    scenes: Arc<RwLock<SceneStore>>,
}

/// Result of applying a scene: how many screens took the configuration and
/// the saved positions translated back to live session ids, ready to feed
/// into [`Controller::update_positions`].
#[derive(Debug)]
pub struct SceneApplyOutcome {
    pub applied: usize,
    pub positions: HashMap<SessionId, Position>,
}

impl Controller {
    pub fn new(registry: Arc<RwLock<Registry>>, scenes: Arc<RwLock<SceneStore>>) -> Self {
        Self { registry, scenes }
    }

    /// Apply a layout and camera assignment to one screen, then re-detect
    /// video-wall groups and push the resulting configuration to the screen
    /// and to every other member of any group it now belongs to.
    pub async fn set_screen_config(
        &self,
        session_id: SessionId,
        layout: Layout,
        slots: CameraSlots,
    ) -> Result<()> {
        let slots = normalize_slots(slots, layout);
        let mut registry = self.registry.write().await;
        registry.set_config(session_id, layout, slots.clone())?;

        let groups = detect_groups(registry.nodes_map(), registry.positions());

        let mut update = ConfigUpdate::plain(layout, slots);
        for group in &groups {
            let Some(member) = group.member(session_id) else {
                continue;
            };
            update.video_wall_mode = true;
            update.quadrant = Some(member.quadrant);

            for other in &group.members {
                if other.session_id == session_id {
                    continue;
                }
                if let Some(node) = registry.node(other.session_id) {
                    let config =
                        ConfigUpdate::wall(node.layout, node.cameras.clone(), other.quadrant);
                    registry.push(other.session_id, ServerEvent::ConfigUpdate(config));
                }
            }
        }

        debug!(
            "Config for {}: layout {}, wall mode {}",
            session_id, layout, update.video_wall_mode
        );
        registry.push(session_id, ServerEvent::ConfigUpdate(update));
        Ok(())
    }

    /// Replace the physical position map and re-detect groups. Members of
    /// every current group get a wall-mode push; nodes that just fell out of
    /// all groups get an explicit clearing push. Returns the group count.
    pub async fn update_positions(&self, positions: HashMap<SessionId, Position>) -> usize {
        let mut registry = self.registry.write().await;

        let grouped_before: HashSet<SessionId> =
            detect_groups(registry.nodes_map(), registry.positions())
                .iter()
                .flat_map(|g| g.members.iter().map(|m| m.session_id))
                .collect();

        registry.set_positions(positions);
        let groups = detect_groups(registry.nodes_map(), registry.positions());

        let mut grouped_now = HashSet::new();
        for group in &groups {
            for member in &group.members {
                grouped_now.insert(member.session_id);
                if let Some(node) = registry.node(member.session_id) {
                    let config =
                        ConfigUpdate::wall(node.layout, node.cameras.clone(), member.quadrant);
                    registry.push(member.session_id, ServerEvent::ConfigUpdate(config));
                }
            }
        }

        for session_id in grouped_before.difference(&grouped_now) {
            if let Some(node) = registry.node(*session_id) {
                let config = ConfigUpdate::plain(node.layout, node.cameras.clone());
                registry.push(*session_id, ServerEvent::ConfigUpdate(config));
            }
        }

        info!("Position update: {} video wall group(s)", groups.len());
        groups.len()
    }

    /// Snapshot every connected screen into a new persisted scene. Positions
    /// come from the operator's request when given, else from the registry's
    /// current map; either way they are stored under persistent ids.
    pub async fn create_scene(
        &self,
        name: String,
        description: String,
        positions: Option<HashMap<SessionId, Position>>,
    ) -> Result<Scene> {
        let configuration = {
            let registry = self.registry.read().await;

            let mut screens = HashMap::new();
            for node in registry.nodes() {
                screens.insert(
                    node.persistent_id.clone(),
                    SavedScreen {
                        name: node.name.clone(),
                        layout: node.layout,
                        cameras: node.cameras.clone(),
                        ip: node.ip.clone(),
                    },
                );
            }

            let source = positions.unwrap_or_else(|| registry.positions().clone());
            let mut screen_positions = HashMap::new();
            for (session_id, position) in source {
                if let Some(node) = registry.node(session_id) {
                    screen_positions.insert(node.persistent_id.clone(), position);
                }
            }

            SceneConfiguration {
                screens,
                screen_positions,
            }
        };

        let now = Utc::now();
        let scene = Scene {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            created_at: now,
            modified_at: now,
            configuration,
        };

        self.scenes.write().await.insert(scene.clone())?;
        info!("Scene '{}' created ({})", scene.name, scene.id);
        Ok(scene)
    }

    pub async fn list_scenes(&self) -> Vec<Scene> {
        self.scenes.read().await.list()
    }

    pub async fn update_scene(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Scene> {
        self.scenes.write().await.update_meta(id, name, description)
    }

    pub async fn delete_scene(&self, id: &str) -> Result<()> {
        self.scenes.write().await.remove(id)
    }

    /// Re-apply a saved scene to whoever is connected right now. Entries are
    /// matched by persistent id first, exact name second; unmatched entries
    /// are skipped. The push is minimal (layout + cameras); wall flags are
    /// not recomputed here.
    pub async fn apply_scene(&self, id: &str) -> Result<SceneApplyOutcome> {
        let scene = {
            let scenes = self.scenes.read().await;
            scenes
                .get(id)
                .cloned()
                .ok_or_else(|| WallError::Scene("scene not found".to_string()))?
        };

        let mut registry = self.registry.write().await;
        let mut mapping: HashMap<&str, SessionId> = HashMap::new();
        let mut applied = 0;

        let mut entries: Vec<(&String, &SavedScreen)> = scene.configuration.screens.iter().collect();
        entries.sort_by_key(|(persistent_id, _)| persistent_id.as_str());

        for (saved_id, saved) in entries {
            let target = registry
                .nodes()
                .into_iter()
                .find(|node| node.persistent_id == *saved_id || node.name == saved.name)
                .map(|node| node.id);

            let Some(session_id) = target else {
                debug!("Scene entry '{}' has no connected screen, skipped", saved_id);
                continue;
            };

            let slots = normalize_slots(saved.cameras.clone(), saved.layout);
            registry.set_config(session_id, saved.layout, slots.clone())?;
            registry.push(
                session_id,
                ServerEvent::ConfigUpdate(ConfigUpdate::plain(saved.layout, slots)),
            );
            mapping.insert(saved_id.as_str(), session_id);
            applied += 1;
        }

        let mut positions = HashMap::new();
        for (saved_id, position) in &scene.configuration.screen_positions {
            if let Some(session_id) = mapping.get(saved_id.as_str()) {
                positions.insert(*session_id, *position);
            }
        }

        info!("Scene '{}' applied to {} screen(s)", scene.name, applied);
        Ok(SceneApplyOutcome { applied, positions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RegisterScreen;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Harness {
        controller: Controller,
        registry: Arc<RwLock<Registry>>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let registry = Arc::new(RwLock::new(Registry::new()));
            let scenes = Arc::new(RwLock::new(SceneStore::load(dir.path().join("scenes.json"))));
            let controller = Controller::new(Arc::clone(&registry), scenes);
            Self {
                controller,
                registry,
                _dir: dir,
            }
        }

        async fn connect(&self, name: &str, ip: &str) -> (SessionId, UnboundedReceiver<ServerEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let session = Uuid::new_v4();
            self.registry.write().await.register(
                session,
                RegisterScreen {
                    ip: ip.to_string(),
                    name: Some(name.to_string()),
                    version: None,
                    capabilities: None,
                    position: None,
                },
                tx,
            );
            (session, rx)
        }
    }

    fn last_config(rx: &mut UnboundedReceiver<ServerEvent>) -> Option<ConfigUpdate> {
        let mut last = None;
        while let Ok(ServerEvent::ConfigUpdate(update)) = rx.try_recv() {
            last = Some(update);
        }
        last
    }

    #[tokio::test]
    async fn slots_match_layout_after_config() {
        let h = Harness::new();
        let (session, mut rx) = h.connect("Lobby", "10.0.0.4").await;

        h.controller
            .set_screen_config(session, Layout::ThreeByThree, vec![Some(1), Some(2)])
            .await
            .unwrap();

        let node_slots = h
            .registry
            .read()
            .await
            .node(session)
            .unwrap()
            .cameras
            .clone();
        assert_eq!(node_slots.len(), Layout::ThreeByThree.cells());
        assert_eq!(node_slots[0], Some(1));
        assert_eq!(node_slots[1], Some(2));
        assert_eq!(node_slots[2], None);

        let update = last_config(&mut rx).unwrap();
        assert_eq!(update.cameras.len(), 9);
        assert!(!update.video_wall_mode);
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let h = Harness::new();
        let result = h
            .controller
            .set_screen_config(Uuid::new_v4(), Layout::OneByOne, vec![Some(1)])
            .await;
        assert!(result.is_err());
    }

    async fn form_wall(h: &Harness) -> Vec<(SessionId, UnboundedReceiver<ServerEvent>)> {
        let mut screens = Vec::new();
        for i in 0..4 {
            let (session, rx) = h
                .connect(&format!("Wall-{}", i), &format!("10.0.0.{}", 10 + i))
                .await;
            h.controller
                .set_screen_config(session, Layout::OneByOne, vec![Some(5)])
                .await
                .unwrap();
            screens.push((session, rx));
        }

        let positions = HashMap::from([
            (screens[0].0, Position { x: 0, y: 0 }),
            (screens[1].0, Position { x: 420, y: 0 }),
            (screens[2].0, Position { x: 0, y: 300 }),
            (screens[3].0, Position { x: 420, y: 300 }),
        ]);
        assert_eq!(h.controller.update_positions(positions).await, 1);
        screens
    }

    #[tokio::test]
    async fn wall_formation_pushes_quadrants_to_all_members() {
        let h = Harness::new();
        let mut screens = form_wall(&h).await;

        let mut quadrants = Vec::new();
        for (_, rx) in screens.iter_mut() {
            let update = last_config(rx).unwrap();
            assert!(update.video_wall_mode);
            quadrants.push(update.quadrant.unwrap());
        }
        quadrants.sort_by_key(|q| q.as_str());
        let mut expected = vec![
            crate::Quadrant::TopLeft,
            crate::Quadrant::TopRight,
            crate::Quadrant::BottomLeft,
            crate::Quadrant::BottomRight,
        ];
        expected.sort_by_key(|q| q.as_str());
        assert_eq!(quadrants, expected);
    }

    #[tokio::test]
    async fn reconfiguring_one_member_renotifies_the_others() {
        let h = Harness::new();
        let mut screens = form_wall(&h).await;
        for (_, rx) in screens.iter_mut() {
            last_config(rx); // drain formation pushes
        }

        // Re-posting the same config re-runs detection and re-notifies the
        // other three members with their quadrants.
        h.controller
            .set_screen_config(screens[0].0, Layout::OneByOne, vec![Some(5)])
            .await
            .unwrap();
        for (_, rx) in screens.iter_mut() {
            let update = last_config(rx).unwrap();
            assert!(update.video_wall_mode);
        }
    }

    #[tokio::test]
    async fn position_update_clears_departed_nodes() {
        let h = Harness::new();
        let mut screens = form_wall(&h).await;
        for (_, rx) in screens.iter_mut() {
            last_config(rx);
        }

        // Drag one screen away: the wall dissolves and every former member
        // gets an explicit clearing push.
        let positions = HashMap::from([
            (screens[0].0, Position { x: 0, y: 0 }),
            (screens[1].0, Position { x: 900, y: 0 }),
            (screens[2].0, Position { x: 0, y: 300 }),
            (screens[3].0, Position { x: 420, y: 300 }),
        ]);
        assert_eq!(h.controller.update_positions(positions).await, 0);

        for (_, rx) in screens.iter_mut() {
            let update = last_config(rx).unwrap();
            assert!(!update.video_wall_mode);
            assert!(update.quadrant.is_none());
        }
    }

    #[tokio::test]
    async fn scene_round_trip_survives_reconnect() {
        let h = Harness::new();
        let (session, _rx) = h.connect("Lobby", "10.0.0.4").await;
        h.controller
            .set_screen_config(session, Layout::TwoByTwo, vec![Some(1), None, Some(2), None])
            .await
            .unwrap();

        let scene = h
            .controller
            .create_scene("Evening".to_string(), String::new(), None)
            .await
            .unwrap();

        // The screen drops and comes back: new session, same identity,
        // default configuration.
        h.registry.write().await.unregister(session);
        let (session2, mut rx2) = h.connect("Lobby", "10.0.0.4").await;
        assert_ne!(session, session2);

        let outcome = h.controller.apply_scene(&scene.id).await.unwrap();
        assert_eq!(outcome.applied, 1);

        let node = h.registry.read().await.node(session2).unwrap().clone();
        assert_eq!(node.layout, Layout::TwoByTwo);
        assert_eq!(node.cameras, vec![Some(1), None, Some(2), None]);

        // The push is minimal: wall flags stay cleared.
        let update = last_config(&mut rx2).unwrap();
        assert_eq!(update.layout, Layout::TwoByTwo);
        assert!(!update.video_wall_mode);
        assert!(update.quadrant.is_none());
    }

    #[tokio::test]
    async fn scene_apply_falls_back_to_name_match() {
        let h = Harness::new();
        let (session, _rx) = h.connect("Lobby", "10.0.0.4").await;
        h.controller
            .set_screen_config(session, Layout::OneByOne, vec![Some(3)])
            .await
            .unwrap();
        let scene = h
            .controller
            .create_scene("Move".to_string(), String::new(), None)
            .await
            .unwrap();

        // Same name, new address: persistent id no longer matches.
        h.registry.write().await.unregister(session);
        let (session2, _rx2) = h.connect("Lobby", "10.0.0.99").await;

        let outcome = h.controller.apply_scene(&scene.id).await.unwrap();
        assert_eq!(outcome.applied, 1);
        let node = h.registry.read().await.node(session2).unwrap().clone();
        assert_eq!(node.layout, Layout::OneByOne);
        assert_eq!(node.cameras, vec![Some(3)]);
    }

    #[tokio::test]
    async fn scene_apply_skips_unmatched_and_translates_positions() {
        let h = Harness::new();
        let (session, _rx) = h.connect("Lobby", "10.0.0.4").await;
        h.controller
            .update_positions(HashMap::from([(session, Position { x: 420, y: 300 })]))
            .await;

        let scene = h
            .controller
            .create_scene("Partial".to_string(), String::new(), None)
            .await
            .unwrap();

        // A second saved screen that is not connected anymore.
        let mut edited = scene.clone();
        edited.configuration.screens.insert(
            "Gone_10_0_0_50".to_string(),
            SavedScreen {
                name: "Gone".to_string(),
                layout: Layout::OneByOne,
                cameras: vec![Some(9)],
                ip: "10.0.0.50".to_string(),
            },
        );
        h.controller
            .scenes
            .write()
            .await
            .insert(edited.clone())
            .unwrap();

        let outcome = h.controller.apply_scene(&edited.id).await.unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(
            outcome.positions,
            HashMap::from([(session, Position { x: 420, y: 300 })])
        );
    }

    #[tokio::test]
    async fn apply_unknown_scene_errors() {
        let h = Harness::new();
        assert!(h.controller.apply_scene("missing").await.is_err());
    }
}

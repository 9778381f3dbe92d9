//! Session registry for connected display nodes.
//!
//! Sessions are ephemeral (one per control-channel connection); the
//! persistent id derived from a node's name and address is what survives
//! reconnects and is what scenes key on. All maps live inside [`Registry`]
//! and mutate only through its API; the server wraps one instance in a
//! single `RwLock`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::{RegisterScreen, ServerEvent};
use crate::{CameraSlots, Layout, Position, Result, WallError};

pub type SessionId = Uuid;

pub const DEFAULT_LAYOUT: Layout = Layout::TwoByTwo;

/// Stable key for a physical device, derived from its announced identity.
pub fn persistent_id(name: &str, ip: &str) -> String {
    format!("{}_{}", name, ip.replace('.', "_"))
}

#[derive(Debug, Clone, Serialize)]
pub struct DisplayNode {
    pub id: SessionId,
    pub persistent_id: String,
    pub name: String,
    pub ip: String,
    pub layout: Layout,
    pub cameras: CameraSlots,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Default)]
pub struct Registry {
    nodes: HashMap<SessionId, DisplayNode>,
    sessions_by_persistent: HashMap<String, SessionId>,
    positions: HashMap<SessionId, Position>,
    senders: HashMap<SessionId, UnboundedSender<ServerEvent>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session for an announcing display. A reconnect under
    /// the same persistent id deliberately does not inherit the previous
    /// session's configuration; only an explicit scene apply restores it.
    pub fn register(
        &mut self,
        session_id: SessionId,
        announce: RegisterScreen,
        sender: UnboundedSender<ServerEvent>,
    ) -> DisplayNode {
        let name = announce
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Wall-{}", self.nodes.len() + 1));
        let ip = if announce.ip.is_empty() {
            "unknown".to_string()
        } else {
            announce.ip
        };

        let node = DisplayNode {
            id: session_id,
            persistent_id: persistent_id(&name, &ip),
            name,
            ip,
            layout: DEFAULT_LAYOUT,
            cameras: vec![None; DEFAULT_LAYOUT.cells()],
            last_seen: Utc::now(),
            position: announce.position,
        };

        self.sessions_by_persistent
            .insert(node.persistent_id.clone(), session_id);
        self.senders.insert(session_id, sender);
        self.nodes.insert(session_id, node.clone());
        node
    }

    /// Refresh liveness only. Nodes are never evicted on heartbeat age;
    /// absence is detected by transport disconnect.
    pub fn heartbeat(&mut self, session_id: SessionId) -> bool {
        match self.nodes.get_mut(&session_id) {
            Some(node) => {
                node.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn unregister(&mut self, session_id: SessionId) -> Option<DisplayNode> {
        let node = self.nodes.remove(&session_id)?;
        if self.sessions_by_persistent.get(&node.persistent_id) == Some(&session_id) {
            self.sessions_by_persistent.remove(&node.persistent_id);
        }
        self.positions.remove(&session_id);
        self.senders.remove(&session_id);
        Some(node)
    }

    pub fn set_config(
        &mut self,
        session_id: SessionId,
        layout: Layout,
        cameras: CameraSlots,
    ) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&session_id)
            .ok_or_else(|| WallError::Registry("screen not found".to_string()))?;
        node.layout = layout;
        node.cameras = cameras;
        Ok(())
    }

    /// Best-effort push to one session; a dead handle just drops the event
    /// (the disconnect handler will clean the session up).
    pub fn push(&self, session_id: SessionId, event: ServerEvent) {
        if let Some(sender) = self.senders.get(&session_id) {
            if sender.send(event).is_err() {
                debug!("Dropped push to closed session {}", session_id);
            }
        }
    }

    pub fn node(&self, session_id: SessionId) -> Option<&DisplayNode> {
        self.nodes.get(&session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.nodes.contains_key(&session_id)
    }

    /// Snapshot of all connected nodes, in stable session-id order.
    pub fn nodes(&self) -> Vec<DisplayNode> {
        let mut list: Vec<DisplayNode> = self.nodes.values().cloned().collect();
        list.sort_by_key(|n| n.id);
        list
    }

    pub(crate) fn nodes_map(&self) -> &HashMap<SessionId, DisplayNode> {
        &self.nodes
    }

    pub fn positions(&self) -> &HashMap<SessionId, Position> {
        &self.positions
    }

    /// Replace the physical position map wholesale.
    pub fn set_positions(&mut self, positions: HashMap<SessionId, Position>) {
        self.positions = positions;
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn announce(name: &str, ip: &str) -> RegisterScreen {
        RegisterScreen {
            ip: ip.to_string(),
            name: Some(name.to_string()),
            version: None,
            capabilities: None,
            position: None,
        }
    }

    #[test]
    fn register_uses_defaults() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let node = registry.register(Uuid::new_v4(), announce("Lobby", "192.168.1.40"), tx);

        assert_eq!(node.persistent_id, "Lobby_192_168_1_40");
        assert_eq!(node.layout, Layout::TwoByTwo);
        assert_eq!(node.cameras, vec![None, None, None, None]);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn register_without_name_numbers_the_wall() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let node = registry.register(
            Uuid::new_v4(),
            RegisterScreen {
                ip: "10.0.0.5".to_string(),
                name: None,
                version: None,
                capabilities: None,
                position: None,
            },
            tx,
        );
        assert_eq!(node.name, "Wall-1");
    }

    #[test]
    fn heartbeat_only_touches_last_seen() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        registry.register(session, announce("Lobby", "192.168.1.40"), tx);

        let before = registry.node(session).unwrap().last_seen;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(registry.heartbeat(session));

        let node = registry.node(session).unwrap();
        assert!(node.last_seen > before);
        assert_eq!(node.layout, Layout::TwoByTwo);
        assert!(!registry.heartbeat(Uuid::new_v4()));
    }

    #[test]
    fn reregister_is_fresh() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = Uuid::new_v4();
        registry.register(first, announce("Lobby", "192.168.1.40"), tx.clone());
        registry
            .set_config(first, Layout::OneByOne, vec![Some(3)])
            .unwrap();

        registry.unregister(first);
        assert_eq!(registry.count(), 0);

        // Same physical device comes back: same persistent id, new session,
        // configuration reset to defaults.
        let second = Uuid::new_v4();
        let node = registry.register(second, announce("Lobby", "192.168.1.40"), tx);
        assert_ne!(node.id, first);
        assert_eq!(node.persistent_id, "Lobby_192_168_1_40");
        assert_eq!(node.layout, Layout::TwoByTwo);
        assert_eq!(node.cameras, vec![None, None, None, None]);
    }

    #[test]
    fn set_config_rejects_unknown_session() {
        let mut registry = Registry::new();
        let result = registry.set_config(Uuid::new_v4(), Layout::OneByOne, vec![None]);
        assert!(result.is_err());
    }

    #[test]
    fn push_reaches_registered_sender() {
        let mut registry = Registry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        registry.register(session, announce("Lobby", "192.168.1.40"), tx);

        registry.push(
            session,
            ServerEvent::ConfigUpdate(crate::protocol::ConfigUpdate::plain(
                Layout::OneByOne,
                vec![Some(1)],
            )),
        );
        assert!(rx.try_recv().is_ok());
    }
}

//! Control-channel message schema.
//!
//! Every event is an internally tagged JSON object so both ends can match
//! exhaustively on the `event` field.

use serde::{Deserialize, Serialize};

use crate::{CameraSlots, Layout, Position, Quadrant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub layouts: Vec<Layout>,
    #[serde(default)]
    pub video_wall: bool,
    #[serde(default)]
    pub max_cameras: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            layouts: vec![Layout::OneByOne, Layout::TwoByTwo, Layout::ThreeByThree],
            video_wall: true,
            max_cameras: 9,
        }
    }
}

/// Announcement a display node sends right after the socket opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterScreen {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub position: Option<Position>,
}

/// Display node → server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    RegisterScreen(RegisterScreen),
    Heartbeat,
}

/// Per-screen configuration pushed by the server. Scene application sends a
/// minimal update where the wall fields stay at their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub layout: Layout,
    pub cameras: CameraSlots,
    #[serde(default)]
    pub video_wall_mode: bool,
    #[serde(default)]
    pub quadrant: Option<Quadrant>,
}

impl ConfigUpdate {
    pub fn plain(layout: Layout, cameras: CameraSlots) -> Self {
        Self {
            layout,
            cameras,
            video_wall_mode: false,
            quadrant: None,
        }
    }

    pub fn wall(layout: Layout, cameras: CameraSlots, quadrant: Quadrant) -> Self {
        Self {
            layout,
            cameras,
            video_wall_mode: true,
            quadrant: Some(quadrant),
        }
    }
}

/// Server → display node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    ConfigUpdate(ConfigUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_tags() {
        let json = serde_json::to_string(&ClientEvent::Heartbeat).unwrap();
        assert_eq!(json, r#"{"event":"heartbeat"}"#);

        let register: ClientEvent = serde_json::from_str(
            r#"{"event":"register_screen","ip":"10.0.0.7","name":"Lobby"}"#,
        )
        .unwrap();
        match register {
            ClientEvent::RegisterScreen(announce) => {
                assert_eq!(announce.ip, "10.0.0.7");
                assert_eq!(announce.name.as_deref(), Some("Lobby"));
                assert!(announce.capabilities.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn minimal_config_update_clears_wall_fields() {
        // A scene-apply push omits the wall fields entirely; receivers must
        // read that as "wall mode off".
        let event: ServerEvent = serde_json::from_str(
            r#"{"event":"config_update","layout":"2x2","cameras":[1,null,2,null]}"#,
        )
        .unwrap();
        let ServerEvent::ConfigUpdate(update) = event;
        assert_eq!(update.layout, Layout::TwoByTwo);
        assert_eq!(update.cameras, vec![Some(1), None, Some(2), None]);
        assert!(!update.video_wall_mode);
        assert!(update.quadrant.is_none());
    }

    #[test]
    fn wall_config_update_round_trip() {
        let update = ConfigUpdate::wall(
            Layout::OneByOne,
            vec![Some(3)],
            Quadrant::TopRight,
        );
        let json = serde_json::to_string(&ServerEvent::ConfigUpdate(update.clone())).unwrap();
        assert!(json.contains(r#""quadrant":"top-right""#));
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        let ServerEvent::ConfigUpdate(decoded) = back;
        assert_eq!(decoded, update);
    }
}

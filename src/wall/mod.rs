//! Video-wall group detection.
//!
//! A group is exactly four screens in `1x1` layout showing the same camera,
//! physically arranged as a 2x2 grid. Detection is a pure function over a
//! registry snapshot plus the position map; it keeps no state and can be
//! re-run after every configuration or position change.

use std::collections::{HashMap, HashSet};

use crate::registry::{DisplayNode, SessionId};
use crate::{Layout, Position, Quadrant};

/// Reference cell size of one physical screen on the floor plan.
pub const SCREEN_WIDTH: i32 = 420;
pub const SCREEN_HEIGHT: i32 = 300;
/// Allowed misalignment when checking the 2x2 arrangement.
pub const POSITION_TOLERANCE: i32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub session_id: SessionId,
    pub position: Position,
    pub quadrant: Quadrant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoWallGroup {
    pub camera_id: u32,
    /// Exactly four members, in quadrant order top-left, top-right,
    /// bottom-left, bottom-right.
    pub members: Vec<GroupMember>,
}

impl VideoWallGroup {
    pub fn member(&self, session_id: SessionId) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.session_id == session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.member(session_id).is_some()
    }
}

/// Detect all video-wall groups. Candidates are visited in session-id order
/// so the result does not depend on map iteration order.
pub fn detect_groups(
    nodes: &HashMap<SessionId, DisplayNode>,
    positions: &HashMap<SessionId, Position>,
) -> Vec<VideoWallGroup> {
    let mut groups = Vec::new();
    let mut visited: HashSet<SessionId> = HashSet::new();

    let mut ordered: Vec<&DisplayNode> = nodes.values().collect();
    ordered.sort_by_key(|n| n.id);

    for seed in &ordered {
        if visited.contains(&seed.id) {
            continue;
        }
        let Some(camera_id) = single_camera(seed) else {
            continue;
        };

        let matching: Vec<(SessionId, Position)> = ordered
            .iter()
            .filter(|n| !visited.contains(&n.id))
            .filter(|n| single_camera(n) == Some(camera_id))
            .map(|n| (n.id, positions.get(&n.id).copied().unwrap_or_default()))
            .collect();

        // Partial walls never form a group; anything but an exact 2x2 set
        // is a normal "no group" outcome, not an error.
        if matching.len() != 4 {
            continue;
        }

        if let Some(members) = arrange_2x2(matching) {
            for member in &members {
                visited.insert(member.session_id);
            }
            groups.push(VideoWallGroup { camera_id, members });
        }
    }

    groups
}

/// A node only seeds or joins a group when it is full-screen on one camera.
fn single_camera(node: &DisplayNode) -> Option<u32> {
    if node.layout != Layout::OneByOne {
        return None;
    }
    node.cameras.first().copied().flatten()
}

/// Check the 2x2 arrangement and assign quadrants by (y, x) order.
fn arrange_2x2(mut candidates: Vec<(SessionId, Position)>) -> Option<Vec<GroupMember>> {
    candidates.sort_by_key(|(_, pos)| (pos.y, pos.x));

    let mut xs: Vec<i32> = candidates.iter().map(|(_, p)| p.x).collect();
    let mut ys: Vec<i32> = candidates.iter().map(|(_, p)| p.y).collect();
    xs.sort_unstable();
    xs.dedup();
    ys.sort_unstable();
    ys.dedup();

    if xs.len() != 2 || ys.len() != 2 {
        return None;
    }
    if (xs[1] - xs[0] - SCREEN_WIDTH).abs() > POSITION_TOLERANCE {
        return None;
    }
    if (ys[1] - ys[0] - SCREEN_HEIGHT).abs() > POSITION_TOLERANCE {
        return None;
    }

    const QUADRANTS: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::TopRight,
        Quadrant::BottomLeft,
        Quadrant::BottomRight,
    ];

    Some(
        candidates
            .into_iter()
            .zip(QUADRANTS)
            .map(|((session_id, position), quadrant)| GroupMember {
                session_id,
                position,
                quadrant,
            })
            .collect(),
    )
}

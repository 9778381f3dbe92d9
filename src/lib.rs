pub mod cameras;
pub mod client;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod rtsp;
pub mod scenes;
pub mod server;
pub mod wall;

pub use error::{Result, WallError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Grid shape of a display node. The cell count bounds how many camera
/// slots the node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    #[serde(rename = "1x1")]
    OneByOne,
    #[serde(rename = "2x2")]
    TwoByTwo,
    #[serde(rename = "3x3")]
    ThreeByThree,
}

impl Layout {
    pub fn cells(self) -> usize {
        let (rows, cols) = self.grid();
        rows * cols
    }

    /// (rows, cols)
    pub fn grid(self) -> (usize, usize) {
        match self {
            Layout::OneByOne => (1, 1),
            Layout::TwoByTwo => (2, 2),
            Layout::ThreeByThree => (3, 3),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Layout::OneByOne => "1x1",
            Layout::TwoByTwo => "2x2",
            Layout::ThreeByThree => "3x3",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layout {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1x1" => Ok(Layout::OneByOne),
            "2x2" => Ok(Layout::TwoByTwo),
            "3x3" => Ok(Layout::ThreeByThree),
            other => Err(WallError::Config(format!("invalid layout '{}'", other))),
        }
    }
}

/// Quadrant of a 2x2 video wall, in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Quadrant {
    pub fn as_str(self) -> &'static str {
        match self {
            Quadrant::TopLeft => "top-left",
            Quadrant::TopRight => "top-right",
            Quadrant::BottomLeft => "bottom-left",
            Quadrant::BottomRight => "bottom-right",
        }
    }
}

/// Physical placement of a display, in pixels of the operator's floor plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| WallError::Config(format!("invalid resolution '{}'", s)))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| WallError::Config(format!("invalid resolution '{}'", s)))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| WallError::Config(format!("invalid resolution '{}'", s)))?;
        Ok(Resolution { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Ordered camera assignment of a display node; `None` is an empty cell.
pub type CameraSlots = Vec<Option<u32>>;

/// Pad or truncate a slot list to the cell count of `layout`.
pub fn normalize_slots(mut slots: CameraSlots, layout: Layout) -> CameraSlots {
    slots.resize(layout.cells(), None);
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_cells() {
        assert_eq!(Layout::OneByOne.cells(), 1);
        assert_eq!(Layout::TwoByTwo.cells(), 4);
        assert_eq!(Layout::ThreeByThree.cells(), 9);
    }

    #[test]
    fn layout_parse_rejects_unknown() {
        assert!("4x4".parse::<Layout>().is_err());
        assert_eq!("3x3".parse::<Layout>().unwrap(), Layout::ThreeByThree);
    }

    #[test]
    fn quadrant_wire_format() {
        let json = serde_json::to_string(&Quadrant::BottomLeft).unwrap();
        assert_eq!(json, "\"bottom-left\"");
    }

    #[test]
    fn resolution_parse() {
        let res: Resolution = "1920x1080".parse().unwrap();
        assert_eq!(res.width, 1920);
        assert_eq!(res.height, 1080);
        assert!("garbage".parse::<Resolution>().is_err());
    }

    #[test]
    fn normalize_pads_and_truncates() {
        assert_eq!(
            normalize_slots(vec![Some(1)], Layout::TwoByTwo),
            vec![Some(1), None, None, None]
        );
        assert_eq!(
            normalize_slots(vec![Some(1), Some(2)], Layout::OneByOne),
            vec![Some(1)]
        );
    }
}

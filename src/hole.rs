//! Hole layout: the playable boundary plus named play areas.
//!
//! A layout is a JSON document shared verbatim with the rendering surface so
//! both sides evaluate containment against the same polygons:
//!
//! ```json
//! {
//!   "name": "Hole 1",
//!   "boundary": [{"latitude": 53.0, "longitude": -6.0}, ...],
//!   "areas": [{"kind": "Green", "polygon": [...]}, ...]
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::geo::{GeoPoint, Polygon};

/// Named play areas within a hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AreaKind {
    TeeBox,
    Bunker,
    Green,
    Fairway,
    TreeLine,
    /// Anything else on the hole (rough, surrounds).
    Zone,
}

impl AreaKind {
    /// Classification priority. The first kind whose polygon contains the
    /// point wins.
    pub const PRIORITY: [AreaKind; 6] = [
        AreaKind::TeeBox,
        AreaKind::Bunker,
        AreaKind::Green,
        AreaKind::Fairway,
        AreaKind::TreeLine,
        AreaKind::Zone,
    ];

    /// Numeric zone code used by the prediction backend.
    pub fn code(self) -> u8 {
        match self {
            AreaKind::Bunker => 0,
            AreaKind::Fairway => 1,
            AreaKind::Green => 2,
            AreaKind::Zone => 3,
            AreaKind::TeeBox => 4,
            AreaKind::TreeLine => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AreaKind::TeeBox => "TeeBox",
            AreaKind::Bunker => "Bunker",
            AreaKind::Green => "Green",
            AreaKind::Fairway => "Fairway",
            AreaKind::TreeLine => "TreeLine",
            AreaKind::Zone => "Zone",
        }
    }
}

impl fmt::Display for AreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One polygon tagged with its area kind. A kind may appear many times
/// (e.g. several bunkers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub kind: AreaKind,
    pub polygon: Polygon,
}

/// Boundary and areas for one hole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoleLayout {
    pub name: String,
    pub boundary: Polygon,
    #[serde(default)]
    pub areas: Vec<Area>,
}

impl HoleLayout {
    /// A layout with only a boundary.
    pub fn bounded(name: impl Into<String>, boundary: Polygon) -> Self {
        Self {
            name: name.into(),
            boundary,
            areas: Vec::new(),
        }
    }

    /// Parse a layout document. Polygons are validated while parsing.
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the shared layout document.
    pub fn to_json(&self) -> Result<String, LayoutError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Geofence gate: is `point` on the playable hole?
    pub fn contains(&self, point: GeoPoint) -> bool {
        self.boundary.contains(point)
    }

    /// Classify `point` into the highest-priority area containing it.
    ///
    /// Falls back to [`AreaKind::Zone`] when no area matches.
    pub fn classify(&self, point: GeoPoint) -> AreaKind {
        AreaKind::PRIORITY
            .into_iter()
            .find(|&kind| {
                self.areas
                    .iter()
                    .any(|a| a.kind == kind && a.polygon.contains(point))
            })
            .unwrap_or(AreaKind::Zone)
    }
}

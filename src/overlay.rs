//! Commands pushed to the rendering surface, and the containment signal it
//! sends back.
//!
//! - [`OverlayCommand`] — core → surface, fire-and-forget
//! - [`ContainmentSignal`] — surface → core, one per fix
//!
//! Commands serialize to tagged JSON objects so a web view can dispatch on
//! the `"cmd"` field.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::geo::GeoPoint;

/// A draw or notify command for the rendering surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum OverlayCommand {
    /// Move the player's live position marker.
    UpdateLiveMarker { point: GeoPoint },
    /// First shot of the session located.
    LocateFirstPoint { point: GeoPoint },
    /// Draw the path of a completed shot.
    DrawSegment { from: GeoPoint, to: GeoPoint },
    /// Show where the current shot is predicted to land.
    PlacePredictedMarker { shot_id: u32, point: GeoPoint },
    /// Show the recommended club for the current shot.
    ShowRecommendation { shot_id: u32, club: String },
    /// A fix fell outside the hole boundary and was ignored.
    ContainmentViolation { point: GeoPoint },
    /// Positioning stopped. Shot logging is blocked until re-subscribed.
    PositioningLost { reason: String },
}

impl OverlayCommand {
    pub(crate) fn positioning_lost(err: &StreamError) -> Self {
        Self::PositioningLost {
            reason: err.to_string(),
        }
    }

    /// Encode as the JSON message posted to the surface.
    pub fn to_json(&self) -> String {
        // Non-finite floats encode as null; no variant can fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for OverlayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateLiveMarker { point } => write!(f, "live {point}"),
            Self::LocateFirstPoint { point } => write!(f, "first {point}"),
            Self::DrawSegment { from, to } => write!(f, "segment {from} -> {to}"),
            Self::PlacePredictedMarker { shot_id, point } => {
                write!(f, "shot {shot_id} landing {point}")
            }
            Self::ShowRecommendation { shot_id, club } => write!(f, "shot {shot_id} club {club}"),
            Self::ContainmentViolation { point } => write!(f, "outside hole at {point}"),
            Self::PositioningLost { reason } => write!(f, "positioning lost: {reason}"),
        }
    }
}

/// Sink for overlay commands. Implementations must not block.
pub trait OverlayBridge {
    fn send(&mut self, cmd: OverlayCommand);
}

impl<F> OverlayBridge for F
where
    F: FnMut(OverlayCommand),
{
    fn send(&mut self, cmd: OverlayCommand) {
        self(cmd)
    }
}

/// Bridge that keeps every command it receives, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingBridge {
    pub commands: Vec<OverlayCommand>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&mut self) -> Vec<OverlayCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl OverlayBridge for RecordingBridge {
    fn send(&mut self, cmd: OverlayCommand) {
        self.commands.push(cmd);
    }
}

// ---------------------------------------------------------------------------
// Inbound containment signal
// ---------------------------------------------------------------------------

/// The surface's own containment verdict for a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainmentSignal {
    Inside,
    Outside,
}

impl ContainmentSignal {
    /// Decode the surface's `"INSIDE"` / `"OUTSIDE"` token. Surrounding
    /// whitespace and case are ignored.
    pub fn decode(token: &str) -> Option<Self> {
        let t = token.trim();
        if t.eq_ignore_ascii_case("INSIDE") {
            Some(Self::Inside)
        } else if t.eq_ignore_ascii_case("OUTSIDE") {
            Some(Self::Outside)
        } else {
            None
        }
    }

    pub fn is_inside(self) -> bool {
        matches!(self, Self::Inside)
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::Inside => "INSIDE",
            Self::Outside => "OUTSIDE",
        }
    }
}

impl From<bool> for ContainmentSignal {
    fn from(inside: bool) -> Self {
        if inside { Self::Inside } else { Self::Outside }
    }
}

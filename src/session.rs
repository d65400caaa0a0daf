//! Round sessions and shot records.
//!
//! A [`RoundSession`] is the sole owner of one player's shots on one hole.
//! [`SessionRegistry`] hands out sessions and refuses a second concurrent
//! session for the same player.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::geo::GeoPoint;
use crate::hole::{AreaKind, HoleLayout};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Backend player identifier (e.g. `"2001"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Process-unique session identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ShotRecord
// ---------------------------------------------------------------------------

/// One shot: where it was played from, where the next one was played from,
/// and what the prediction service expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRecord {
    /// 1-based, strictly increasing within a session.
    pub shot_id: u32,
    pub start: GeoPoint,
    #[serde(default)]
    pub end: Option<GeoPoint>,
    #[serde(default)]
    pub predicted_landing: Option<GeoPoint>,
    #[serde(default)]
    pub recommended_club: Option<String>,
    #[serde(default)]
    pub start_area: Option<AreaKind>,
    #[serde(default)]
    pub end_area: Option<AreaKind>,
}

impl ShotRecord {
    pub fn new(shot_id: u32, start: GeoPoint) -> Self {
        Self {
            shot_id,
            start,
            end: None,
            predicted_landing: None,
            recommended_club: None,
            start_area: None,
            end_area: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    /// Ground distance covered (m), once the shot is closed.
    pub fn distance_m(&self) -> Option<f64> {
        self.end.map(|end| self.start.distance_m(&end))
    }

    /// Error between predicted and actual landing (m), when both are known.
    pub fn prediction_error_m(&self) -> Option<f64> {
        match (self.predicted_landing, self.end) {
            (Some(p), Some(e)) => Some(p.distance_m(&e)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RoundSession
// ---------------------------------------------------------------------------

/// One player's shots on one hole.
///
/// Only [`SessionRegistry::open`] hands these out:
///
/// ```compile_fail
/// use caddie::{GeoPoint, HoleLayout, Polygon, RoundSession};
///
/// let square = Polygon::new(vec![
///     GeoPoint::new(0.0, 0.0),
///     GeoPoint::new(0.0, 1.0),
///     GeoPoint::new(1.0, 1.0),
/// ])?;
/// let _ = RoundSession::new("2001".into(), HoleLayout::bounded("h", square));
/// # Ok::<(), caddie::GeometryError>(())
/// ```
#[derive(Debug)]
pub struct RoundSession {
    id: SessionId,
    player: PlayerId,
    layout: HoleLayout,
    shots: Vec<ShotRecord>,
    _lease: Option<Lease>,
}

impl RoundSession {
    /// A session not tracked by any registry.
    #[cfg(test)]
    pub(crate) fn new(player: PlayerId, layout: HoleLayout) -> Self {
        Self::with_lease(player, layout, None)
    }

    fn with_lease(player: PlayerId, layout: HoleLayout, lease: Option<Lease>) -> Self {
        let id = SessionId::next();
        tracing::info!(session = %id, %player, hole = %layout.name, "round session opened");
        Self {
            id,
            player,
            layout,
            shots: Vec::new(),
            _lease: lease,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    pub fn layout(&self) -> &HoleLayout {
        &self.layout
    }

    pub fn shots(&self) -> &[ShotRecord] {
        &self.shots
    }

    pub fn shot(&self, shot_id: u32) -> Option<&ShotRecord> {
        // Ids are dense from 1, so the id is also the position.
        let idx = usize::try_from(shot_id).ok()?.checked_sub(1)?;
        self.shots.get(idx)
    }

    /// The most recently created shot (the one in progress).
    pub fn latest(&self) -> Option<&ShotRecord> {
        self.shots.last()
    }

    pub(crate) fn latest_mut(&mut self) -> Option<&mut ShotRecord> {
        self.shots.last_mut()
    }

    /// Classify a point when the layout has named areas.
    pub(crate) fn area_of(&self, point: GeoPoint) -> Option<AreaKind> {
        if self.layout.areas.is_empty() {
            None
        } else {
            Some(self.layout.classify(point))
        }
    }

    /// Id the next shot will get. `None` once ids are exhausted.
    pub(crate) fn next_shot_id(&self) -> Option<u32> {
        match self.shots.last() {
            None => Some(1),
            Some(s) => s.shot_id.checked_add(1),
        }
    }

    /// Append a new shot starting at `start`. Returns its id, or `None`
    /// (and appends nothing) once ids are exhausted.
    pub(crate) fn begin_shot(&mut self, start: GeoPoint) -> Option<u32> {
        let shot_id = self.next_shot_id()?;
        let mut shot = ShotRecord::new(shot_id, start);
        shot.start_area = self.area_of(start);
        self.shots.push(shot);
        Some(shot_id)
    }

    #[cfg(test)]
    pub(crate) fn push_shot(&mut self, shot: ShotRecord) {
        self.shots.push(shot);
    }

    /// Close the shot in progress at `end`. Returns the closed shot.
    pub(crate) fn close_latest(&mut self, end: GeoPoint) -> Option<&ShotRecord> {
        let area = self.area_of(end);
        let shot = self.shots.last_mut()?;
        shot.end = Some(end);
        shot.end_area = area;
        Some(shot)
    }

    /// Serialize all shots as a JSON array, for diagnostics.
    pub fn shots_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.shots)
    }
}

impl Drop for RoundSession {
    fn drop(&mut self) {
        tracing::info!(session = %self.id, player = %self.player, shots = self.shots.len(), "round session closed");
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type ActiveSet = Arc<Mutex<HashSet<PlayerId>>>;

/// Marks a player as having an active session until dropped.
#[derive(Debug)]
struct Lease {
    player: PlayerId,
    active: ActiveSet,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.active.lock().remove(&self.player);
    }
}

/// Enforces at most one live [`RoundSession`] per player.
///
/// Cheap to clone; clones share the same set of active players.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: ActiveSet,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `player` on `layout`.
    ///
    /// Fails if the player already holds a session. The player is released
    /// when the returned session is dropped.
    pub fn open(&self, player: PlayerId, layout: HoleLayout) -> Result<RoundSession, SessionError> {
        {
            let mut active = self.active.lock();
            if !active.insert(player.clone()) {
                return Err(SessionError::AlreadyActive { player });
            }
        }
        let lease = Lease {
            player: player.clone(),
            active: Arc::clone(&self.active),
        };
        Ok(RoundSession::with_lease(player, layout, Some(lease)))
    }

    pub fn is_active(&self, player: &PlayerId) -> bool {
        self.active.lock().contains(player)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

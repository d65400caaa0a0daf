//! Geofenced shot sequencing.
//!
//! ```text
//! Idle ──start──▶ AwaitingFirstPoint ──inside fix──▶ AwaitingNextPoint ─┐
//!   ▲                                                     ▲  inside fix │
//!   └──────────────────────── teardown ───────────────────┴─────────────┘
//! ```
//!
//! Each inside fix either creates shot 1 or closes the shot in progress and
//! opens the next. Outside fixes change nothing beyond a violation notice.
//! Every new shot yields a [`PredictionRequest`]; its [`PredictionCompletion`]
//! is applied only while that shot is still the latest one of the same
//! session.

use serde::{Deserialize, Serialize};

use crate::error::{PredictionError, SessionError};
use crate::geo::GeoPoint;
use crate::overlay::{ContainmentSignal, OverlayBridge, OverlayCommand};
use crate::predict::ShotPrediction;
use crate::session::{PlayerId, RoundSession, SessionId};
use crate::stream::Fix;

/// Sequencer state, derived from the session it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    Idle,
    AwaitingFirstPoint,
    AwaitingNextPoint,
}

/// Work order for the prediction client, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub session: SessionId,
    pub player: PlayerId,
    pub shot_id: u32,
    pub start: GeoPoint,
}

/// Result of a [`PredictionRequest`], carrying the same tags.
#[derive(Debug)]
pub struct PredictionCompletion {
    pub session: SessionId,
    pub shot_id: u32,
    pub result: Result<ShotPrediction, PredictionError>,
}

/// What a fix did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// No session; the fix was ignored.
    Idle,
    /// Outside the hole boundary; nothing changed.
    Outside,
    /// Shot ids are used up; nothing changed.
    Exhausted,
    /// Shot 1 created.
    FirstShot(PredictionRequest),
    /// Shot `closed` ended at this fix and `request.shot_id` began.
    NextShot {
        closed: u32,
        request: PredictionRequest,
    },
}

impl Step {
    /// The prediction to dispatch, if a shot was created.
    pub fn request(&self) -> Option<&PredictionRequest> {
        match self {
            Step::FirstShot(r) | Step::NextShot { request: r, .. } => Some(r),
            Step::Idle | Step::Outside | Step::Exhausted => None,
        }
    }
}

/// What happened to a prediction completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Written to the latest shot and rendered.
    Applied,
    /// The prediction failed; the shot keeps no prediction.
    Failed,
    /// Superseded by a later shot or session; dropped.
    Stale,
}

/// The single writer of a [`RoundSession`]'s shots.
#[derive(Debug, Default)]
pub struct ShotSequencer {
    session: Option<RoundSession>,
    /// Core verdict for the most recent fix: `(timestamp_ms, inside)`.
    last_verdict: Option<(u64, bool)>,
    divergences: u64,
}

impl ShotSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle → AwaitingFirstPoint.
    pub fn start(&mut self, session: RoundSession) -> Result<(), SessionError> {
        if let Some(current) = &self.session {
            return Err(SessionError::AlreadyActive {
                player: current.player().clone(),
            });
        }
        tracing::info!(session = %session.id(), player = %session.player(), "sequencer started");
        self.session = Some(session);
        self.last_verdict = None;
        self.divergences = 0;
        Ok(())
    }

    /// Any state → Idle. Returns the session so the caller can inspect or
    /// export it before it is dropped. Divergence counts start over.
    pub fn teardown(&mut self) -> Option<RoundSession> {
        self.last_verdict = None;
        self.divergences = 0;
        let session = self.session.take();
        if let Some(s) = &session {
            tracing::info!(session = %s.id(), shots = s.shots().len(), "sequencer torn down");
        }
        session
    }

    pub fn state(&self) -> SequencerState {
        match &self.session {
            None => SequencerState::Idle,
            Some(s) if s.latest().is_none() => SequencerState::AwaitingFirstPoint,
            Some(_) => SequencerState::AwaitingNextPoint,
        }
    }

    pub fn session(&self) -> Option<&RoundSession> {
        self.session.as_ref()
    }

    /// Number of fixes where the rendering surface's containment verdict
    /// disagreed with the core's.
    pub fn divergences(&self) -> u64 {
        self.divergences
    }

    /// Consume one qualifying fix.
    pub fn on_fix(&mut self, fix: &Fix, bridge: &mut impl OverlayBridge) -> Step {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(ts = fix.timestamp_ms(), "fix ignored: no session");
            return Step::Idle;
        };
        let point = fix.point();
        bridge.send(OverlayCommand::UpdateLiveMarker { point });

        let inside = session.layout().contains(point);
        self.last_verdict = Some((fix.timestamp_ms(), inside));
        if !inside {
            tracing::warn!(session = %session.id(), %point, "fix outside hole boundary");
            bridge.send(OverlayCommand::ContainmentViolation { point });
            return Step::Outside;
        }

        if session.next_shot_id().is_none() {
            tracing::warn!(session = %session.id(), %point, "shot ids exhausted; fix ignored");
            return Step::Exhausted;
        }

        let closed = match session.latest().map(|s| (s.shot_id, s.start)) {
            None => None,
            Some((shot_id, from)) => {
                session.close_latest(point);
                bridge.send(OverlayCommand::DrawSegment { from, to: point });
                Some(shot_id)
            }
        };

        let Some(shot_id) = session.begin_shot(point) else {
            return Step::Exhausted;
        };
        tracing::info!(session = %session.id(), shot_id, %point, "shot started");
        let request = PredictionRequest {
            session: session.id(),
            player: session.player().clone(),
            shot_id,
            start: point,
        };

        match closed {
            None => {
                bridge.send(OverlayCommand::LocateFirstPoint { point });
                Step::FirstShot(request)
            }
            Some(closed) => Step::NextShot { closed, request },
        }
    }

    /// Apply a prediction result if it still belongs to the latest shot of
    /// the current session.
    pub fn apply_prediction(
        &mut self,
        completion: PredictionCompletion,
        bridge: &mut impl OverlayBridge,
    ) -> Resolution {
        let PredictionCompletion {
            session: tag,
            shot_id,
            result,
        } = completion;

        let Some(session) = self.session.as_mut() else {
            tracing::debug!(session = %tag, shot_id, "stale prediction: no session");
            return Resolution::Stale;
        };
        let current_id = session.id();
        let Some(latest) = session.latest_mut().filter(|s| tag == current_id && s.shot_id == shot_id) else {
            tracing::debug!(session = %tag, current = %current_id, shot_id, "stale prediction dropped");
            return Resolution::Stale;
        };

        match result {
            Ok(p) => {
                latest.predicted_landing = Some(p.predicted_landing);
                latest.recommended_club = Some(p.recommended_club.clone());
                tracing::info!(session = %tag, shot_id, landing = %p.predicted_landing, club = %p.recommended_club, "prediction applied");
                bridge.send(OverlayCommand::PlacePredictedMarker {
                    shot_id,
                    point: p.predicted_landing,
                });
                bridge.send(OverlayCommand::ShowRecommendation {
                    shot_id,
                    club: p.recommended_club,
                });
                Resolution::Applied
            }
            Err(e) => {
                tracing::warn!(session = %tag, shot_id, stage = %e.stage(), error = %e, "prediction failed");
                Resolution::Failed
            }
        }
    }

    /// Compare the rendering surface's verdict for the fix at `timestamp_ms`
    /// with the core's. Returns `false` on divergence. Signals for any fix
    /// other than the most recent one are ignored.
    pub fn on_bridge_signal(&mut self, timestamp_ms: u64, signal: ContainmentSignal) -> bool {
        match self.last_verdict {
            Some((ts, inside)) if ts == timestamp_ms => {
                if inside != signal.is_inside() {
                    self.divergences += 1;
                    tracing::warn!(
                        ts,
                        core = inside,
                        surface = signal.as_token(),
                        "containment evaluators disagree"
                    );
                    return false;
                }
                true
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Polygon;
    use crate::hole::HoleLayout;
    use crate::overlay::RecordingBridge;
    use crate::predict::Stage;
    use crate::session::ShotRecord;
    use proptest::prelude::*;

    fn unit_square() -> HoleLayout {
        HoleLayout::bounded(
            "unit",
            Polygon::new(vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(0.0, 1.0),
                GeoPoint::new(1.0, 1.0),
                GeoPoint::new(1.0, 0.0),
            ])
            .unwrap(),
        )
    }

    fn started() -> ShotSequencer {
        crate::test_log::init();
        let mut seq = ShotSequencer::new();
        seq.start(RoundSession::new("2001".into(), unit_square())).unwrap();
        seq
    }

    fn fix(lat: f64, lon: f64, ts: u64) -> Fix {
        Fix::new(GeoPoint::new(lat, lon), ts)
    }

    fn prediction(lat: f64, lon: f64, club: &str) -> ShotPrediction {
        ShotPrediction {
            predicted_landing: GeoPoint::new(lat, lon),
            recommended_club: club.into(),
        }
    }

    fn completion(seq: &ShotSequencer, shot_id: u32, p: ShotPrediction) -> PredictionCompletion {
        PredictionCompletion {
            session: seq.session().unwrap().id(),
            shot_id,
            result: Ok(p),
        }
    }

    #[test]
    fn idle_ignores_fixes() {
        let mut seq = ShotSequencer::new();
        let mut bridge = RecordingBridge::new();
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge), Step::Idle);
        assert!(bridge.commands.is_empty());
    }

    #[test]
    fn unit_square_scenario() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        assert_eq!(seq.state(), SequencerState::AwaitingFirstPoint);

        // A: inside → shot 1
        let step = seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge);
        let req = step.request().unwrap();
        assert_eq!((req.shot_id, req.start), (1, GeoPoint::new(0.5, 0.5)));
        assert!(matches!(step, Step::FirstShot(_)));
        assert_eq!(seq.state(), SequencerState::AwaitingNextPoint);
        assert_eq!(
            bridge.take(),
            vec![
                OverlayCommand::UpdateLiveMarker { point: GeoPoint::new(0.5, 0.5) },
                OverlayCommand::LocateFirstPoint { point: GeoPoint::new(0.5, 0.5) },
            ]
        );

        // B: outside → no transition, violation
        assert_eq!(seq.on_fix(&fix(2.0, 2.0, 2), &mut bridge), Step::Outside);
        assert_eq!(seq.state(), SequencerState::AwaitingNextPoint);
        assert_eq!(seq.session().unwrap().shots().len(), 1);
        assert_eq!(
            bridge.take(),
            vec![
                OverlayCommand::UpdateLiveMarker { point: GeoPoint::new(2.0, 2.0) },
                OverlayCommand::ContainmentViolation { point: GeoPoint::new(2.0, 2.0) },
            ]
        );

        // C: inside → close shot 1, open shot 2
        let step = seq.on_fix(&fix(0.6, 0.6, 3), &mut bridge);
        assert!(matches!(step, Step::NextShot { closed: 1, ref request } if request.shot_id == 2));
        let shots = seq.session().unwrap().shots();
        assert_eq!(shots[0].end, Some(GeoPoint::new(0.6, 0.6)));
        assert_eq!(shots[1].shot_id, 2);
        assert_eq!(shots[1].start, GeoPoint::new(0.6, 0.6));
        assert!(shots[1].end.is_none());
        assert_eq!(
            bridge.take(),
            vec![
                OverlayCommand::UpdateLiveMarker { point: GeoPoint::new(0.6, 0.6) },
                OverlayCommand::DrawSegment {
                    from: GeoPoint::new(0.5, 0.5),
                    to: GeoPoint::new(0.6, 0.6),
                },
            ]
        );
    }

    #[test]
    fn segments_chain_from_previous_end() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        for (i, p) in [0.1, 0.2, 0.3].into_iter().enumerate() {
            seq.on_fix(&fix(p, p, i as u64), &mut bridge);
        }
        let segments: Vec<_> = bridge
            .take()
            .into_iter()
            .filter_map(|c| match c {
                OverlayCommand::DrawSegment { from, to } => Some((from.latitude, to.latitude)),
                _ => None,
            })
            .collect();
        assert_eq!(segments, vec![(0.1, 0.2), (0.2, 0.3)]);
    }

    #[test]
    fn late_prediction_is_stale() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge);
        seq.on_fix(&fix(0.6, 0.6, 2), &mut bridge);
        bridge.take();

        // Shot 1's prediction arrives after shot 2 exists.
        let c = completion(&seq, 1, prediction(0.9, 0.9, "Driver"));
        assert_eq!(seq.apply_prediction(c, &mut bridge), Resolution::Stale);
        let s1 = seq.session().unwrap().shot(1).unwrap();
        assert!(s1.predicted_landing.is_none());
        assert!(s1.recommended_club.is_none());
        assert!(bridge.commands.is_empty());
    }

    #[test]
    fn early_prediction_is_kept() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge);

        // Shot 1's prediction arrives before shot 2 exists.
        let c = completion(&seq, 1, prediction(0.9, 0.9, "Driver"));
        assert_eq!(seq.apply_prediction(c, &mut bridge), Resolution::Applied);
        seq.on_fix(&fix(0.6, 0.6, 2), &mut bridge);

        // Shot 2 does not disturb shot 1's prediction.
        let s1 = seq.session().unwrap().shot(1).unwrap();
        assert_eq!(s1.predicted_landing, Some(GeoPoint::new(0.9, 0.9)));
        assert_eq!(s1.recommended_club.as_deref(), Some("Driver"));
        assert!(seq.session().unwrap().shot(2).unwrap().predicted_landing.is_none());

        let cmds = bridge.take();
        assert!(cmds.contains(&OverlayCommand::PlacePredictedMarker {
            shot_id: 1,
            point: GeoPoint::new(0.9, 0.9),
        }));
        assert!(cmds.contains(&OverlayCommand::ShowRecommendation {
            shot_id: 1,
            club: "Driver".into(),
        }));
    }

    #[test]
    fn prediction_from_other_session_is_stale() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        let old = seq.session().unwrap().id();
        seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge);
        drop(seq.teardown());

        // Same shot id, new session.
        seq.start(RoundSession::new("2001".into(), unit_square())).unwrap();
        seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge);
        let c = PredictionCompletion {
            session: old,
            shot_id: 1,
            result: Ok(prediction(0.9, 0.9, "Driver")),
        };
        assert_eq!(seq.apply_prediction(c, &mut bridge), Resolution::Stale);
        assert!(seq.session().unwrap().shot(1).unwrap().predicted_landing.is_none());
    }

    #[test]
    fn prediction_after_teardown_is_stale() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge);
        let c = completion(&seq, 1, prediction(0.9, 0.9, "Driver"));
        let session = seq.teardown().unwrap();
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(seq.apply_prediction(c, &mut bridge), Resolution::Stale);
        assert!(session.shot(1).unwrap().predicted_landing.is_none());
    }

    #[test]
    fn failed_prediction_leaves_fields_absent() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        seq.on_fix(&fix(0.5, 0.5, 1), &mut bridge);
        bridge.take();

        let c = PredictionCompletion {
            session: seq.session().unwrap().id(),
            shot_id: 1,
            result: Err(PredictionError::MalformedResponse {
                stage: Stage::Location,
                reason: "latitude is not a finite number (null)".into(),
            }),
        };
        assert_eq!(seq.apply_prediction(c, &mut bridge), Resolution::Failed);
        assert!(seq.session().unwrap().shot(1).unwrap().predicted_landing.is_none());
        assert!(bridge.commands.is_empty());

        // Sequencing continues.
        let step = seq.on_fix(&fix(0.6, 0.6, 2), &mut bridge);
        assert_eq!(step.request().map(|r| r.shot_id), Some(2));
    }

    #[test]
    fn start_twice_rejected() {
        let mut seq = started();
        let err = seq
            .start(RoundSession::new("2002".into(), unit_square()))
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive { .. }));
    }

    #[test]
    fn bridge_divergence_counted() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        seq.on_fix(&fix(0.5, 0.5, 10), &mut bridge);

        assert!(seq.on_bridge_signal(10, ContainmentSignal::Inside));
        assert!(!seq.on_bridge_signal(10, ContainmentSignal::Outside));
        // Signals for older fixes are not compared.
        assert!(seq.on_bridge_signal(9, ContainmentSignal::Outside));
        assert_eq!(seq.divergences(), 1);
        // The core verdict stays authoritative.
        assert_eq!(seq.session().unwrap().shots().len(), 1);
    }

    #[test]
    fn divergences_reset_with_session() {
        let mut seq = started();
        let mut bridge = RecordingBridge::new();
        seq.on_fix(&fix(0.5, 0.5, 10), &mut bridge);
        assert!(!seq.on_bridge_signal(10, ContainmentSignal::Outside));
        assert_eq!(seq.divergences(), 1);

        drop(seq.teardown());
        assert_eq!(seq.divergences(), 0);
        seq.start(RoundSession::new("2001".into(), unit_square())).unwrap();
        assert_eq!(seq.divergences(), 0);
        // The previous session's verdict is gone too.
        assert!(seq.on_bridge_signal(10, ContainmentSignal::Outside));
        assert_eq!(seq.divergences(), 0);
    }

    #[test]
    fn exhausted_shot_ids_leave_session_untouched() {
        let mut session = RoundSession::new("2001".into(), unit_square());
        session.push_shot(ShotRecord::new(u32::MAX, GeoPoint::new(0.5, 0.5)));
        let mut seq = ShotSequencer::new();
        seq.start(session).unwrap();
        let mut bridge = RecordingBridge::new();

        assert_eq!(seq.on_fix(&fix(0.6, 0.6, 1), &mut bridge), Step::Exhausted);
        let s = seq.session().unwrap();
        assert_eq!(s.shots().len(), 1);
        assert!(s.latest().unwrap().end.is_none());
        assert!(
            !bridge
                .commands
                .iter()
                .any(|c| matches!(c, OverlayCommand::DrawSegment { .. }))
        );
    }

    proptest! {
        #[test]
        fn shot_ids_dense_despite_outside_fixes(
            inside in proptest::collection::vec(any::<bool>(), 1..60),
        ) {
            let mut seq = started();
            let mut bridge = RecordingBridge::new();
            for (i, is_in) in inside.iter().enumerate() {
                let f = if *is_in {
                    fix(0.1 + i as f64 * 0.01, 0.5, i as u64)
                } else {
                    fix(5.0, 5.0, i as u64)
                };
                seq.on_fix(&f, &mut bridge);
            }

            let shots = seq.session().unwrap().shots();
            let expected = inside.iter().filter(|b| **b).count();
            prop_assert_eq!(shots.len(), expected);
            for (i, s) in shots.iter().enumerate() {
                prop_assert_eq!(s.shot_id as usize, i + 1);
                // Every shot but the last is closed.
                prop_assert_eq!(s.end.is_some(), i + 1 < shots.len());
            }
        }
    }
}

//! Two-stage shot prediction.
//!
//! For each shot the client asks the service where the ball will land
//! (stage 1), then which club to hit to get there (stage 2). Stage 2 only
//! runs when stage 1 returned a well-formed location. Failures name the
//! stage and are never retried here; retry policy belongs to the caller.

pub mod wire;

#[cfg(feature = "http")]
pub mod http;

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PredictionError, TransportError};
use crate::geo::GeoPoint;
use crate::session::PlayerId;

/// Default prediction service address (local development backend).
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Which half of the exchange a result or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// `POST /predictlocation/{player_id}`
    Location,
    /// `POST /predictclub/{player_id}`
    Club,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Location => write!(f, "predictlocation"),
            Stage::Club => write!(f, "predictclub"),
        }
    }
}

/// Both stages' results for one shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotPrediction {
    pub predicted_landing: GeoPoint,
    pub recommended_club: String,
}

/// Service connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub base_url: String,
    /// Per-request timeout (ms). `None` keeps the transport default.
    pub timeout_ms: Option<u64>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: None,
        }
    }
}

impl PredictionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// JSON-over-request/response transport to the prediction service.
pub trait PredictionTransport: Send + Sync {
    /// POST `body` to `path` (e.g. `/predictlocation/2001`) and return the
    /// decoded JSON response body.
    fn post_json(&self, path: &str, body: Value) -> Result<Value, TransportError>;
}

impl<F> PredictionTransport for F
where
    F: Fn(&str, Value) -> Result<Value, TransportError> + Send + Sync,
{
    fn post_json(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self(path, body)
    }
}

/// Drives the two dependent prediction calls for a shot.
#[derive(Debug, Clone)]
pub struct PredictionClient<T> {
    transport: T,
}

impl<T: PredictionTransport> PredictionClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run stage 1 then stage 2 for `shot_id` played from `start`.
    pub fn predict_shot(
        &self,
        player: &PlayerId,
        shot_id: u32,
        start: GeoPoint,
    ) -> Result<ShotPrediction, PredictionError> {
        let predicted_landing = self.predict_location(player, shot_id, start)?;
        let recommended_club = self.predict_club(player, shot_id, start, predicted_landing)?;
        tracing::debug!(%player, shot_id, landing = %predicted_landing, club = %recommended_club, "prediction complete");
        Ok(ShotPrediction {
            predicted_landing,
            recommended_club,
        })
    }

    /// Stage 1: predicted landing location.
    pub fn predict_location(
        &self,
        player: &PlayerId,
        shot_id: u32,
        start: GeoPoint,
    ) -> Result<GeoPoint, PredictionError> {
        let body = to_body(Stage::Location, &wire::LocationRequest::new(shot_id, start))?;
        let resp = self.post(Stage::Location, &wire::location_path(player), body)?;
        wire::decode_location(&resp).map_err(|reason| PredictionError::malformed(Stage::Location, reason))
    }

    /// Stage 2: recommended club to reach `landing` from `start`.
    pub fn predict_club(
        &self,
        player: &PlayerId,
        shot_id: u32,
        start: GeoPoint,
        landing: GeoPoint,
    ) -> Result<String, PredictionError> {
        let body = to_body(Stage::Club, &wire::ClubRequest::new(shot_id, start, landing))?;
        let resp = self.post(Stage::Club, &wire::club_path(player), body)?;
        wire::decode_club(&resp).map_err(|reason| PredictionError::malformed(Stage::Club, reason))
    }

    fn post(&self, stage: Stage, path: &str, body: Value) -> Result<Value, PredictionError> {
        self.transport
            .post_json(path, body)
            .map_err(|source| PredictionError::Network { stage, source })
    }
}

fn to_body<B: Serialize>(stage: Stage, body: &B) -> Result<Value, PredictionError> {
    serde_json::to_value(body)
        .map_err(|e| PredictionError::malformed(stage, format!("cannot encode request: {e}")))
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// A transport that answers from a fixed script and records every request.
///
/// Responses are consumed in order, regardless of path.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    requests: Mutex<Vec<(String, Value)>>,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = Result<Value, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Sleep before answering each request.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, response: Result<Value, TransportError>) {
        self.responses.lock().push_back(response);
    }

    /// `(path, body)` for every request seen so far.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().clone()
    }
}

impl PredictionTransport for ScriptedTransport {
    fn post_json(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.requests.lock().push((path.to_string(), body));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(TransportError::Request {
                path: path.to_string(),
                reason: "no scripted response".into(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn player() -> PlayerId {
        PlayerId::new("2001")
    }

    #[test]
    fn two_stage_success() {
        let t = ScriptedTransport::new([
            Ok(json!({"latitude": 53.2, "longitude": -6.3})),
            Ok(json!({"Club": "5-Iron"})),
        ]);
        let client = PredictionClient::new(t);
        let p = client
            .predict_shot(&player(), 1, GeoPoint::new(53.1, -6.2))
            .unwrap();
        assert_eq!(p.predicted_landing, GeoPoint::new(53.2, -6.3));
        assert_eq!(p.recommended_club, "5-Iron");

        let reqs = client.transport().requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].0, "/predictlocation/2001");
        assert_eq!(reqs[0].1, json!({"start_x": 53.1, "start_y": -6.2, "shot_id": 1}));
        assert_eq!(reqs[1].0, "/predictclub/2001");
        assert_eq!(
            reqs[1].1,
            json!({"start_x": 53.1, "start_y": -6.2, "end_x": 53.2, "end_y": -6.3, "shot_id": 1})
        );
    }

    #[test]
    fn malformed_location_skips_club_stage() {
        let t = ScriptedTransport::new([
            Ok(json!({"latitude": null, "longitude": 12.3})),
            Ok(json!({"Club": "Driver"})),
        ]);
        let client = PredictionClient::new(t);
        let err = client
            .predict_shot(&player(), 1, GeoPoint::new(0.5, 0.5))
            .unwrap_err();

        assert!(matches!(
            err,
            PredictionError::MalformedResponse {
                stage: Stage::Location,
                ..
            }
        ));
        // Stage 2 never invoked.
        assert_eq!(client.transport().requests().len(), 1);
    }

    #[test]
    fn network_failure_names_stage() {
        let t = ScriptedTransport::new([
            Ok(json!({"latitude": 1.0, "longitude": 2.0})),
            Err(TransportError::Status {
                path: "/predictclub/2001".into(),
                status: 500,
            }),
        ]);
        let client = PredictionClient::new(t);
        let err = client
            .predict_shot(&player(), 2, GeoPoint::new(0.5, 0.5))
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Club);
        assert!(matches!(err, PredictionError::Network { .. }));
        assert!(err.to_string().starts_with("predictclub request failed"), "{err}");
    }

    #[test]
    fn stage_one_network_failure() {
        let client = PredictionClient::new(ScriptedTransport::new([]));
        let err = client
            .predict_shot(&player(), 1, GeoPoint::new(0.5, 0.5))
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Location);
        assert_eq!(client.transport().requests().len(), 1);
    }

    #[test]
    fn malformed_club() {
        let t = ScriptedTransport::new([
            Ok(json!({"latitude": 1.0, "longitude": 2.0})),
            Ok(json!({"club": "lowercase key"})),
        ]);
        let err = PredictionClient::new(t)
            .predict_shot(&player(), 1, GeoPoint::new(0.5, 0.5))
            .unwrap_err();
        assert!(matches!(
            err,
            PredictionError::MalformedResponse {
                stage: Stage::Club,
                ..
            }
        ));
    }

    #[test]
    fn closure_transport() {
        let client = PredictionClient::new(|path: &str, body: Value| -> Result<Value, TransportError> {
            if path.starts_with("/predictlocation/") {
                Ok(json!({"latitude": body["start_x"], "longitude": body["start_y"]}))
            } else {
                Ok(json!({"Club": "Putter"}))
            }
        });
        let p = client.predict_shot(&player(), 9, GeoPoint::new(1.0, 2.0)).unwrap();
        assert_eq!(p.predicted_landing, GeoPoint::new(1.0, 2.0));
        assert_eq!(p.recommended_club, "Putter");
    }

    #[test]
    fn config_defaults() {
        let c: PredictionConfig = serde_json::from_str(r#"{"timeout_ms": 1500}"#).unwrap();
        assert_eq!(c.base_url, DEFAULT_BASE_URL);
        assert_eq!(c.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(PredictionConfig::default().timeout(), None);
    }
}

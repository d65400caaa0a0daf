use thiserror::Error;

use crate::geo::GeoPoint;
use crate::predict::Stage;
use crate::session::PlayerId;

/// Errors arising from polygon construction and evaluator consistency checks.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("polygon needs at least 3 vertices, got {got}")]
    TooFewVertices { got: usize },

    #[error("non-finite coordinate at vertex {index} ({latitude}, {longitude})")]
    NonFinite {
        index: usize,
        latitude: f64,
        longitude: f64,
    },

    #[error("containment evaluators disagree at {point}: core={core}, external={external}")]
    EvaluatorMismatch {
        point: GeoPoint,
        core: bool,
        external: bool,
    },
}

/// Errors loading a hole layout document.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Malformed JSON, or a polygon that failed validation while parsing.
    #[error("invalid layout JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal positioning failures. The stream closes after emitting one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position source unavailable: {reason}")]
    SourceUnavailable { reason: String },
}

impl StreamError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            reason: reason.into(),
        }
    }
}

/// Failures of the underlying request/response transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {path} failed: {reason}")]
    Request { path: String, reason: String },

    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },

    #[error("{path} returned a body that is not JSON: {source}")]
    Body {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A failed two-stage prediction. Always names the stage that failed.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("{stage} request failed: {source}")]
    Network {
        stage: Stage,
        #[source]
        source: TransportError,
    },

    #[error("{stage} response malformed: {reason}")]
    MalformedResponse { stage: Stage, reason: String },
}

impl PredictionError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Network { stage, .. } | Self::MalformedResponse { stage, .. } => *stage,
        }
    }

    pub(crate) fn malformed(stage: Stage, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            stage,
            reason: reason.into(),
        }
    }
}

/// Session lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("player {player} already has an active round session")]
    AlreadyActive { player: PlayerId },

    #[error("no active round session")]
    NoActiveSession,
}

/// Errors surfaced by the round driver loop.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Positioning ended. Shot logging cannot continue until the caller
    /// re-subscribes.
    #[error("positioning stopped: {0}")]
    Positioning(#[from] StreamError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The rendering surface's containment test disagrees with the core's.
    #[error("surface containment check failed: {0}")]
    Geometry(#[from] GeometryError),

    #[error("prediction dispatcher unavailable")]
    DispatcherClosed,
}

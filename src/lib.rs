//! Geofenced shot sequencing for a golf caddie app.
//!
//! Position fixes stream in from the device ([`stream`]), are gated by the
//! hole boundary ([`geo`], [`hole`]), and turn into numbered shots
//! ([`sequencer`]). Each new shot triggers a two-stage prediction
//! ([`predict`]) whose result is applied only while the shot is still
//! current. Everything visible is pushed to a rendering surface as
//! [`overlay`] commands. [`driver`] ties these together on one thread.

pub mod driver;
pub mod error;
pub mod geo;
pub mod hole;
pub mod overlay;
pub mod predict;
pub mod sequencer;
pub mod session;
pub mod stream;

pub use driver::{DriverEvent, PredictionDispatcher, RoundDriver};
pub use error::{
    DriverError, GeometryError, LayoutError, PredictionError, SessionError, StreamError,
    TransportError,
};
pub use geo::{ContainmentEvaluator, GeoPoint, Polygon};
pub use hole::{AreaKind, HoleLayout};
pub use overlay::{ContainmentSignal, OverlayBridge, OverlayCommand};
pub use predict::{PredictionClient, PredictionConfig, PredictionTransport, ShotPrediction, Stage};
pub use sequencer::{SequencerState, ShotSequencer, Step};
pub use session::{PlayerId, RoundSession, SessionId, SessionRegistry, ShotRecord};
pub use stream::{Fix, PositionSource, PositionStream, Reading, Subscription, WatchOptions};

#[cfg(feature = "http")]
pub use predict::http::HttpTransport;

#[cfg(test)]
pub(crate) mod test_log {
    use once_cell::sync::OnceCell;
    use tracing_subscriber::EnvFilter;

    static INIT: OnceCell<()> = OnceCell::new();

    /// Install a test-writer subscriber once. Filter from `TEST_LOG`, then
    /// `RUST_LOG`, else `warn`.
    pub fn init() {
        INIT.get_or_init(|| {
            let filter = std::env::var("TEST_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "warn".into());
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(filter))
                .with_test_writer()
                .try_init();
        });
    }
}

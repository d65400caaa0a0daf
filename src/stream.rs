//! Position stream: wraps a raw positioning source and emits filtered fixes.
//!
//! A [`PositionSource`] is driven on its own thread. Every raw [`Reading`]
//! passes through a [`FixFilter`]; qualifying fixes are pushed to the
//! subscriber over a channel. A source failure is delivered once as
//! [`StreamEvent::Terminated`] and the stream closes. Nothing is retried.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::geo::GeoPoint;

/// How long the stream thread waits on the source before re-checking for
/// unsubscribe.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Accuracy class requested from the positioning hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accuracy {
    Lowest,
    Low,
    Balanced,
    #[default]
    High,
    Highest,
    BestForNavigation,
}

/// Subscription options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    pub accuracy: Accuracy,
    /// Minimum time between emitted fixes (ms).
    pub min_interval_ms: u64,
    /// Minimum distance between emitted fixes (m).
    pub min_distance_m: f64,
    /// Drop readings whose reported accuracy radius exceeds this (m).
    pub max_accuracy_m: Option<f64>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::High,
            min_interval_ms: 2000,
            min_distance_m: 4.0,
            max_accuracy_m: None,
        }
    }
}

impl WatchOptions {
    /// No interval or distance thresholds. Only duplicate and out-of-order
    /// readings are dropped.
    pub fn unthrottled() -> Self {
        Self {
            min_interval_ms: 0,
            min_distance_m: 0.0,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Readings and fixes
// ---------------------------------------------------------------------------

/// A raw position report from the source, before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub point: GeoPoint,
    /// Source timestamp (ms since the Unix epoch).
    pub timestamp_ms: u64,
    /// Reported accuracy radius (m).
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

impl Reading {
    pub fn new(point: GeoPoint, timestamp_ms: u64) -> Self {
        Self {
            point,
            timestamp_ms,
            accuracy_m: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

/// A reading that passed the filter. Immutable once emitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    point: GeoPoint,
    timestamp_ms: u64,
    accuracy_m: Option<f64>,
}

impl Fix {
    pub fn new(point: GeoPoint, timestamp_ms: u64) -> Self {
        Self {
            point,
            timestamp_ms,
            accuracy_m: None,
        }
    }

    pub fn point(&self) -> GeoPoint {
        self.point
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn accuracy_m(&self) -> Option<f64> {
        self.accuracy_m
    }
}

impl From<Reading> for Fix {
    fn from(r: Reading) -> Self {
        Self {
            point: r.point,
            timestamp_ms: r.timestamp_ms,
            accuracy_m: r.accuracy_m,
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Why a reading was not emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    NonFinite,
    Inaccurate { accuracy_m: f64 },
    /// Timestamp not after the last emitted fix (duplicate or reordered).
    NotNewer,
    TooSoon { elapsed_ms: u64 },
    TooClose { distance_m: f64 },
}

/// Noise filter applied to raw readings.
///
/// A reading is emitted only if its timestamp is strictly after the last
/// emitted fix, at least `min_interval_ms` has elapsed, AND at least
/// `min_distance_m` has been travelled. The first reading is always emitted
/// (subject to the finiteness and accuracy checks).
#[derive(Debug, Clone)]
pub struct FixFilter {
    options: WatchOptions,
    last: Option<Fix>,
}

impl FixFilter {
    pub fn new(options: WatchOptions) -> Self {
        Self {
            options,
            last: None,
        }
    }

    pub fn last_emitted(&self) -> Option<&Fix> {
        self.last.as_ref()
    }

    /// Feed one reading. Returns the fix to emit, or why it was dropped.
    pub fn offer(&mut self, reading: Reading) -> Result<Fix, Rejection> {
        if !reading.point.is_finite() {
            return Err(Rejection::NonFinite);
        }
        if let (Some(max), Some(acc)) = (self.options.max_accuracy_m, reading.accuracy_m)
            && acc > max
        {
            return Err(Rejection::Inaccurate { accuracy_m: acc });
        }

        if let Some(last) = &self.last {
            if reading.timestamp_ms <= last.timestamp_ms {
                return Err(Rejection::NotNewer);
            }
            let elapsed_ms = reading.timestamp_ms - last.timestamp_ms;
            if elapsed_ms < self.options.min_interval_ms {
                return Err(Rejection::TooSoon { elapsed_ms });
            }
            let distance_m = last.point.distance_m(&reading.point);
            if distance_m < self.options.min_distance_m {
                return Err(Rejection::TooClose { distance_m });
            }
        }

        let fix = Fix::from(reading);
        self.last = Some(fix);
        Ok(fix)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// The device positioning subsystem.
pub trait PositionSource: Send + 'static {
    /// Ask for location permission. A denial is terminal.
    fn request_permission(&mut self) -> Result<(), StreamError>;

    /// Begin a new hardware session with the given options.
    fn start(&mut self, options: &WatchOptions) -> Result<(), StreamError>;

    /// Wait up to `timeout` for the next raw reading. `Ok(None)` means
    /// nothing arrived in time. Errors are terminal.
    fn next_reading(&mut self, timeout: Duration) -> Result<Option<Reading>, StreamError>;
}

/// Events delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fix(Fix),
    /// Last event on the stream.
    Terminated(StreamError),
}

/// Entry point for subscribing to filtered fixes.
pub struct PositionStream;

impl PositionStream {
    /// Start a new hardware session on `source` and stream filtered fixes.
    ///
    /// Permission and start failures arrive as the first (and only) event.
    pub fn subscribe<S: PositionSource>(source: S, options: WatchOptions) -> Subscription {
        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name("caddie-position".into())
            .spawn(move || run_source(source, options, tx, thread_stop));

        let events = match spawned {
            Ok(_) => rx,
            Err(e) => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                let _ = tx.send(StreamEvent::Terminated(StreamError::unavailable(format!(
                    "cannot spawn position thread: {e}"
                ))));
                rx
            }
        };

        Subscription { events, stop }
    }
}

fn run_source<S: PositionSource>(
    mut source: S,
    options: WatchOptions,
    tx: Sender<StreamEvent>,
    stop: Arc<AtomicBool>,
) {
    let started = source
        .request_permission()
        .and_then(|()| source.start(&options));
    if let Err(e) = started {
        tracing::warn!(error = %e, "position source failed to start");
        let _ = tx.send(StreamEvent::Terminated(e));
        return;
    }
    tracing::debug!(?options, "position stream started");

    let mut filter = FixFilter::new(options);
    while !stop.load(Ordering::Acquire) {
        match source.next_reading(POLL_INTERVAL) {
            Ok(None) => continue,
            Ok(Some(reading)) => match filter.offer(reading) {
                Ok(fix) => {
                    if tx.send(StreamEvent::Fix(fix)).is_err() {
                        break;
                    }
                }
                Err(why) => {
                    tracing::trace!(?why, ts = reading.timestamp_ms, "reading dropped");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "position source terminated");
                let _ = tx.send(StreamEvent::Terminated(e));
                break;
            }
        }
    }
    tracing::debug!("position stream closed");
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    events: Receiver<StreamEvent>,
    stop: Arc<AtomicBool>,
}

impl Subscription {
    /// The event channel, for use with `crossbeam_channel::select!`.
    pub fn events(&self) -> &Receiver<StreamEvent> {
        &self.events
    }

    /// Block up to `timeout` for the next event. `None` on timeout or once
    /// the stream has closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StreamEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stop the underlying source. Pending events are discarded.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

/// A [`PositionSource`] that replays a fixed list of readings.
///
/// Useful for replaying recorded rounds and for tests.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    script: VecDeque<Result<Reading, StreamError>>,
    deny_permission: bool,
    hold_open: bool,
    pacing: Duration,
}

impl ScriptedSource {
    pub fn new(readings: impl IntoIterator<Item = Reading>) -> Self {
        Self {
            script: readings.into_iter().map(Ok).collect(),
            ..Self::default()
        }
    }

    /// Refuse location permission.
    pub fn denied() -> Self {
        Self {
            deny_permission: true,
            ..Self::default()
        }
    }

    /// Fail with `err` after the scripted readings.
    pub fn then_fail(mut self, err: StreamError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    /// Keep the stream open (idle) once the script is exhausted instead of
    /// reporting the source as unavailable.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Sleep this long before delivering each reading.
    pub fn paced(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }
}

impl PositionSource for ScriptedSource {
    fn request_permission(&mut self) -> Result<(), StreamError> {
        if self.deny_permission {
            Err(StreamError::PermissionDenied)
        } else {
            Ok(())
        }
    }

    fn start(&mut self, _options: &WatchOptions) -> Result<(), StreamError> {
        Ok(())
    }

    fn next_reading(&mut self, timeout: Duration) -> Result<Option<Reading>, StreamError> {
        match self.script.pop_front() {
            Some(Ok(reading)) => {
                if !self.pacing.is_zero() {
                    thread::sleep(self.pacing);
                }
                Ok(Some(reading))
            }
            Some(Err(e)) => Err(e),
            None if self.hold_open => {
                thread::sleep(timeout);
                Ok(None)
            }
            None => Err(StreamError::unavailable("script exhausted")),
        }
    }
}

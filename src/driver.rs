//! Round event loop.
//!
//! [`RoundDriver`] owns the sequencer and the overlay bridge and multiplexes
//! two queues on one thread: filtered fixes from the position stream, and
//! completions from the [`PredictionDispatcher`]'s workers. Each prediction
//! runs on its own worker so a slow service never holds up the next fix.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};

use crate::error::{DriverError, SessionError, StreamError};
use crate::geo::{self, ContainmentEvaluator};
use crate::overlay::{ContainmentSignal, OverlayBridge, OverlayCommand};
use crate::predict::{PredictionClient, PredictionTransport};
use crate::sequencer::{PredictionCompletion, PredictionRequest, Resolution, ShotSequencer, Step};
use crate::session::RoundSession;
use crate::stream::{Fix, PositionSource, PositionStream, StreamEvent, Subscription, WatchOptions};

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send + 'static>;
type Spawner = fn(String, Job) -> io::Result<()>;

fn spawn_worker(name: String, job: Job) -> io::Result<()> {
    thread::Builder::new().name(name).spawn(job).map(drop)
}

/// Runs prediction requests off the driver thread and queues the tagged
/// results.
pub struct PredictionDispatcher<T> {
    client: Arc<PredictionClient<T>>,
    tx: Sender<PredictionCompletion>,
    rx: Receiver<PredictionCompletion>,
    spawn: Spawner,
}

impl<T: PredictionTransport + 'static> PredictionDispatcher<T> {
    pub fn new(client: PredictionClient<T>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            client: Arc::new(client),
            tx,
            rx,
            spawn: spawn_worker,
        }
    }

    pub fn client(&self) -> &PredictionClient<T> {
        &self.client
    }

    /// Completed predictions, in completion order (not request order).
    pub fn completions(&self) -> &Receiver<PredictionCompletion> {
        &self.rx
    }

    /// Start both prediction stages for `request` on a worker thread.
    pub fn dispatch(&self, request: PredictionRequest) -> io::Result<()> {
        let client = Arc::clone(&self.client);
        let tx = self.tx.clone();
        let name = format!("caddie-predict-{}", request.shot_id);

        (self.spawn)(
            name,
            Box::new(move || {
                let PredictionRequest {
                    session,
                    player,
                    shot_id,
                    start,
                } = request;
                let result = client.predict_shot(&player, shot_id, start);
                // The driver may already be gone; nothing to deliver to.
                let _ = tx.send(PredictionCompletion {
                    session,
                    shot_id,
                    result,
                });
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// One unit of work handled by [`RoundDriver::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Fix { fix: Fix, step: Step },
    Prediction { shot_id: u32, resolution: Resolution },
}

/// Single-owner event loop for one device.
pub struct RoundDriver<B, T> {
    bridge: B,
    sequencer: ShotSequencer,
    dispatcher: PredictionDispatcher<T>,
    subscription: Option<Subscription>,
}

impl<B, T> RoundDriver<B, T>
where
    B: OverlayBridge,
    T: PredictionTransport + 'static,
{
    pub fn new(bridge: B, client: PredictionClient<T>) -> Self {
        Self {
            bridge,
            sequencer: ShotSequencer::new(),
            dispatcher: PredictionDispatcher::new(client),
            subscription: None,
        }
    }

    /// Begin `session` and subscribe to `source`.
    pub fn start<S: PositionSource>(
        &mut self,
        session: RoundSession,
        source: S,
        options: WatchOptions,
    ) -> Result<(), DriverError> {
        self.sequencer.start(session)?;
        self.subscription = Some(PositionStream::subscribe(source, options));
        Ok(())
    }

    /// [`RoundDriver::start`], after checking that the rendering surface's
    /// containment test agrees with the core's on the hole boundary.
    ///
    /// On disagreement nothing is started and the session is dropped.
    pub fn start_verified<S: PositionSource>(
        &mut self,
        session: RoundSession,
        source: S,
        options: WatchOptions,
        surface: &impl ContainmentEvaluator,
    ) -> Result<(), DriverError> {
        let boundary = &session.layout().boundary;
        if let Err(e) = geo::verify_agreement(boundary, surface, &geo::sample_points(boundary)) {
            tracing::warn!(session = %session.id(), error = %e, "surface containment check failed");
            return Err(e.into());
        }
        self.start(session, source, options)
    }

    /// Replace the position subscription of the running session, e.g. after
    /// positioning was lost.
    pub fn resubscribe<S: PositionSource>(
        &mut self,
        source: S,
        options: WatchOptions,
    ) -> Result<(), DriverError> {
        if self.sequencer.session().is_none() {
            return Err(SessionError::NoActiveSession.into());
        }
        self.subscription = Some(PositionStream::subscribe(source, options));
        Ok(())
    }

    /// Unsubscribe and end the session. Predictions still in flight resolve
    /// as stale.
    pub fn teardown(&mut self) -> Option<RoundSession> {
        self.subscription = None;
        self.sequencer.teardown()
    }

    /// Handle at most one fix or completion, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout. A positioning failure is reported to
    /// the bridge and returned once; the session stays open.
    pub fn step(&mut self, timeout: Duration) -> Result<Option<DriverEvent>, DriverError> {
        let events = self
            .subscription
            .as_ref()
            .map_or_else(crossbeam_channel::never, |s| s.events().clone());
        let completions = self.dispatcher.completions().clone();

        select! {
            recv(events) -> ev => match ev {
                Ok(StreamEvent::Fix(fix)) => Ok(Some(self.on_fix(fix))),
                Ok(StreamEvent::Terminated(e)) => Err(self.positioning_lost(e)),
                Err(_) => Err(self.positioning_lost(StreamError::unavailable("position stream closed"))),
            },
            recv(completions) -> done => {
                let done = done.map_err(|_| DriverError::DispatcherClosed)?;
                let shot_id = done.shot_id;
                let resolution = self.sequencer.apply_prediction(done, &mut self.bridge);
                Ok(Some(DriverEvent::Prediction { shot_id, resolution }))
            },
            default(timeout) => Ok(None),
        }
    }

    /// Forward the rendering surface's containment verdict for the fix at
    /// `timestamp_ms`. Returns `false` on disagreement with the core.
    pub fn on_bridge_signal(&mut self, timestamp_ms: u64, signal: ContainmentSignal) -> bool {
        self.sequencer.on_bridge_signal(timestamp_ms, signal)
    }

    pub fn sequencer(&self) -> &ShotSequencer {
        &self.sequencer
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    pub fn dispatcher(&self) -> &PredictionDispatcher<T> {
        &self.dispatcher
    }

    /// Whether a position subscription is live.
    pub fn is_positioning(&self) -> bool {
        self.subscription.is_some()
    }

    fn on_fix(&mut self, fix: Fix) -> DriverEvent {
        let step = self.sequencer.on_fix(&fix, &mut self.bridge);
        if let Some(request) = step.request()
            && let Err(e) = self.dispatcher.dispatch(request.clone())
        {
            // The shot simply keeps no prediction.
            tracing::warn!(shot_id = request.shot_id, error = %e, "prediction not dispatched");
        }
        DriverEvent::Fix { fix, step }
    }

    fn positioning_lost(&mut self, err: StreamError) -> DriverError {
        tracing::warn!(error = %err, "positioning lost");
        self.subscription = None;
        self.bridge.send(OverlayCommand::positioning_lost(&err));
        DriverError::Positioning(err)
    }
}

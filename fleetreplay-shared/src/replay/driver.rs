//! Async tick driver for a shared [`ReplayEngine`].
//!
//! The engine itself is synchronous. [`PlaybackDriver`] puts it behind a mutex,
//! runs a tick loop on a Tokio task while playing, and cancels that task on
//! pause. Tick sources are pluggable: a fixed interval for servers and
//! headless runs, or an external per-frame signal.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    engine::{EngineState, LoadSummary, ReplayEngine},
    status::FleetStatus,
    store::LastPosition,
    subscribers::{SubscriberRegistry, Subscription},
};
use crate::models::{Batch, FleetFeed, ReplayError};

/// Default cadence of [`IntervalTicks`].
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Produces the real instants at which the engine should advance.
#[async_trait]
pub trait TickSource: Send {
    /// Waits for the next tick. `None` ends the tick loop.
    async fn next_tick(&mut self) -> Option<Instant>;
}

/// Ticks on a fixed period. A late tick delays the following ones instead of
/// bursting to catch up.
#[derive(Debug)]
pub struct IntervalTicks {
    interval: tokio::time::Interval,
}

impl IntervalTicks {
    /// Must be created inside a Tokio runtime.
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> Option<Instant> {
        Some(self.interval.tick().await.into_std())
    }
}

/// Ticks whenever the paired [`FrameSignal`] fires, e.g. once per rendered frame.
///
/// Clones share one receiver, so the source survives pause and resume.
#[derive(Debug, Clone)]
pub struct FrameTicks {
    frames: Arc<AsyncMutex<mpsc::Receiver<()>>>,
}

/// Sending half of a [`FrameTicks`] source.
#[derive(Debug, Clone)]
pub struct FrameSignal {
    tx: mpsc::Sender<()>,
}

impl FrameTicks {
    /// Creates a signal/source pair buffering up to `capacity` frames.
    pub fn channel(capacity: usize) -> (FrameSignal, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            FrameSignal { tx },
            Self {
                frames: Arc::new(AsyncMutex::new(rx)),
            },
        )
    }
}

#[async_trait]
impl TickSource for FrameTicks {
    async fn next_tick(&mut self) -> Option<Instant> {
        self.frames.lock().await.recv().await?;
        Some(tokio::time::Instant::now().into_std())
    }
}

impl FrameSignal {
    /// Requests a tick. Returns `false` when the buffer is full or the source is gone.
    pub fn frame(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

type TickFactory = Arc<dyn Fn() -> Box<dyn TickSource> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle that plays a [`ReplayEngine`] in the background.
///
/// Clones control the same engine. Ticks, seeks and control calls are
/// serialized by one mutex, and subscriber callbacks run while it is held:
/// a callback must not call back into the driver except through
/// [`PlaybackDriver::subscribe`].
#[derive(Clone)]
pub struct PlaybackDriver {
    engine: Arc<Mutex<ReplayEngine>>,
    subscribers: SubscriberRegistry,
    ticker: Arc<Mutex<Option<CancellationToken>>>,
    ticks: TickFactory,
}

impl fmt::Debug for PlaybackDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackDriver")
            .field("state", &self.state())
            .field("ticking", &self.is_ticking())
            .finish_non_exhaustive()
    }
}

impl PlaybackDriver {
    /// Drives `engine` with [`IntervalTicks`] of the given period.
    pub fn new(engine: ReplayEngine, tick_interval: Duration) -> Self {
        Self::with_tick_source(engine, move || Box::new(IntervalTicks::new(tick_interval)))
    }

    /// Drives `engine` with a custom tick source, created afresh on every start.
    pub fn with_tick_source<F>(engine: ReplayEngine, ticks: F) -> Self
    where
        F: Fn() -> Box<dyn TickSource> + Send + Sync + 'static,
    {
        Self {
            subscribers: engine.subscribers().clone(),
            engine: Arc::new(Mutex::new(engine)),
            ticker: Arc::new(Mutex::new(None)),
            ticks: Arc::new(ticks),
        }
    }

    /// Starts playback and spawns the tick loop.
    ///
    /// Returns `false` when no data is loaded. Must be called inside a Tokio
    /// runtime.
    pub fn start(&self) -> bool {
        let now = tokio::time::Instant::now().into_std();
        if !lock(&self.engine).start_at(now) {
            return false;
        }

        let mut ticker = lock(&self.ticker);
        if ticker.is_none() {
            let token = CancellationToken::new();
            tokio::spawn(run_ticks(
                Arc::clone(&self.engine),
                Arc::clone(&self.ticker),
                (self.ticks)(),
                token.clone(),
            ));
            *ticker = Some(token);
        }
        true
    }

    /// Pauses playback and stops the tick loop.
    pub fn pause(&self) {
        lock(&self.engine).pause();
        self.stop_ticker();
    }

    /// See [`ReplayEngine::set_speed`].
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidSpeed`] and keeps the current speed.
    pub fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        lock(&self.engine).set_speed(speed)
    }

    /// See [`ReplayEngine::seek`].
    pub fn seek(&self, offset_ms: i64) -> Option<Batch> {
        lock(&self.engine).seek(offset_ms)
    }

    /// See [`ReplayEngine::restart`].
    pub fn restart(&self) {
        lock(&self.engine).restart();
    }

    /// Replaces the loaded trips. Playback stops.
    ///
    /// # Errors
    /// Returns [`ReplayError::MalformedData`]; the current session is untouched.
    pub fn load(&self, feed: FleetFeed) -> Result<LoadSummary, ReplayError> {
        let summary = lock(&self.engine).load(feed)?;
        self.stop_ticker();
        Ok(summary)
    }

    /// Current clock state.
    pub fn state(&self) -> EngineState {
        lock(&self.engine).state()
    }

    /// Fleet counters.
    pub fn fleet_status(&self) -> FleetStatus {
        lock(&self.engine).fleet_status()
    }

    /// Last delivered positions.
    pub fn last_positions(&self) -> Vec<LastPosition> {
        lock(&self.engine).last_positions()
    }

    /// Registers a batch callback. Safe to call from inside another callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Batch) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Forwards batches into a bounded channel.
    ///
    /// Batches are dropped with a warning while the channel is full. The
    /// subscription is removed once the receiver is dropped. Must be called
    /// inside a Tokio runtime.
    pub fn subscribe_channel(&self, capacity: usize) -> mpsc::Receiver<Batch> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = tx.clone();
        let subscription = self.subscribe(move |batch| {
            if let Err(mpsc::error::TrySendError::Full(dropped)) = sender.try_send(batch.clone()) {
                warn!(events = dropped.len(), "batch channel full; dropping batch");
            }
        });

        tokio::spawn(async move {
            tx.closed().await;
            drop(subscription);
            debug!("batch channel closed");
        });
        rx
    }

    /// Runs `f` with exclusive access to the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut ReplayEngine) -> R) -> R {
        f(&mut lock(&self.engine))
    }

    /// Whether a tick loop is currently running.
    pub fn is_ticking(&self) -> bool {
        lock(&self.ticker).is_some()
    }

    fn stop_ticker(&self) {
        let mut ticker = lock(&self.ticker);
        if let Some(token) = ticker.take() {
            token.cancel();
        }
    }
}

async fn run_ticks(
    engine: Arc<Mutex<ReplayEngine>>,
    ticker: Arc<Mutex<Option<CancellationToken>>>,
    mut source: Box<dyn TickSource>,
    token: CancellationToken,
) {
    debug!("tick loop started");
    loop {
        let tick = tokio::select! {
            () = token.cancelled() => break,
            tick = source.next_tick() => tick,
        };
        let Some(at) = tick else {
            release_exhausted(&engine, &ticker, &token);
            break;
        };
        lock(&engine).tick_at(at);
    }
    debug!("tick loop stopped");
}

/// Frees the ticker slot and pauses the engine after the source ran dry.
///
/// Tokens are only replaced after being cancelled, so an uncancelled token
/// still owns the slot. Lock order is ticker, then engine.
fn release_exhausted(
    engine: &Mutex<ReplayEngine>,
    ticker: &Mutex<Option<CancellationToken>>,
    token: &CancellationToken,
) {
    let mut slot = lock(ticker);
    if token.is_cancelled() {
        return;
    }
    slot.take();
    token.cancel();
    lock(engine).pause();
    warn!("tick source exhausted; playback paused");
}

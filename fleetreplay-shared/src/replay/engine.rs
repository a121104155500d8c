use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    clock::VirtualClock,
    status::FleetStatus,
    store::{EventStore, LastPosition},
    subscribers::{SubscriberRegistry, Subscription},
};
use crate::models::{Batch, FleetFeed, ReplayError};

/// Snapshot of the clock exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    /// Current virtual time; `None` before any data is loaded.
    pub current_time: Option<DateTime<Utc>>,
    /// Whether ticks advance the clock.
    pub playing: bool,
    /// Virtual milliseconds per real millisecond.
    pub speed_multiplier: f64,
}

/// Counts reported after a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    /// Number of trips installed.
    pub trips: usize,
    /// Number of events across those trips.
    pub events: usize,
}

/// Virtual-clock replay engine.
///
/// Owns the event store, the clock, and the subscribers of one playback
/// session. Every operation takes `&mut self`, so ticks and seeks are
/// serialized by construction; wrap the engine in a lock to share it.
///
/// Seeking backwards is forward-only with respect to delivery: events already
/// handed out are not delivered again when the clock passes them a second
/// time. Use [`ReplayEngine::restart`] to re-arm a session.
#[derive(Debug, Default)]
pub struct ReplayEngine {
    store: EventStore,
    clock: VirtualClock,
    subscribers: SubscriberRegistry,
}

impl ReplayEngine {
    /// An engine with no data at the default speed.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine with no data at a custom speed.
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidSpeed`] if `speed` is not positive and finite.
    pub fn with_speed(speed: f64) -> Result<Self, ReplayError> {
        Ok(Self {
            clock: VirtualClock::with_speed(speed)?,
            ..Self::default()
        })
    }

    /// Replaces all trips with `feed` and rewinds the clock to its earliest event.
    ///
    /// Playback stops; the speed and subscribers are kept. When validation
    /// fails nothing changes.
    ///
    /// # Errors
    /// Returns [`ReplayError::MalformedData`] if any trip or event is invalid.
    pub fn load(&mut self, feed: FleetFeed) -> Result<LoadSummary, ReplayError> {
        let store = EventStore::from_feed(feed)?;
        let summary = LoadSummary {
            trips: store.len(),
            events: store.total_events(),
        };

        self.clock.reset_to(store.earliest());
        self.store = store;
        info!(
            trips = summary.trips,
            events = summary.events,
            start = ?self.clock.now(),
            "replay data loaded"
        );
        Ok(summary)
    }

    /// Parses and loads a JSON feed document.
    ///
    /// # Errors
    /// Returns [`ReplayError::MalformedData`] if the document or any event is invalid.
    pub fn load_json(&mut self, json: &str) -> Result<LoadSummary, ReplayError> {
        self.load(FleetFeed::from_json(json)?)
    }

    /// Starts playing now. See [`ReplayEngine::start_at`].
    pub fn start(&mut self) -> bool {
        self.start_at(Instant::now())
    }

    /// Starts playing with `real_now` as the tick reference.
    ///
    /// Returns `false` without changing anything when no data is loaded.
    pub fn start_at(&mut self, real_now: Instant) -> bool {
        let started = self.clock.start(real_now);
        if started {
            debug!(at = ?self.clock.now(), "playback started");
        }
        started
    }

    /// Stops the clock; no batches are produced until the next start.
    pub fn pause(&mut self) {
        self.clock.pause();
        debug!(at = ?self.clock.now(), "playback paused");
    }

    /// Changes the speed multiplier from the next tick on.
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidSpeed`] and keeps the current speed if
    /// `speed` is not positive and finite.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), ReplayError> {
        self.clock.set_speed(speed)?;
        debug!(speed, "playback speed changed");
        Ok(())
    }

    /// Shifts virtual time by `offset_ms` and immediately dispatches whatever
    /// became due.
    ///
    /// A forward seek delivers every skipped event in one batch. A backward
    /// seek only moves the clock; nothing already delivered is re-armed.
    pub fn seek(&mut self, offset_ms: i64) -> Option<Batch> {
        let now = self.clock.offset(offset_ms)?;
        debug!(offset_ms, %now, "seek");
        self.dispatch_due(now)
    }

    /// Advances the clock by the real time elapsed since the previous tick.
    pub fn tick(&mut self) -> Option<Batch> {
        self.tick_at(Instant::now())
    }

    /// Advances the clock to match `real_now` and dispatches due events.
    ///
    /// A no-op while paused or before data is loaded.
    pub fn tick_at(&mut self, real_now: Instant) -> Option<Batch> {
        let now = self.clock.advance(real_now)?;
        self.dispatch_due(now)
    }

    /// Rewinds every trip and moves the clock back to the earliest event.
    ///
    /// Speed and playing state are preserved.
    pub fn restart(&mut self) {
        self.store.rewind();
        if let Some(earliest) = self.store.earliest() {
            self.clock.jump_to(earliest);
        }
        info!(at = ?self.clock.now(), "playback restarted");
    }

    /// Current clock state.
    pub fn state(&self) -> EngineState {
        EngineState {
            current_time: self.clock.now(),
            playing: self.clock.is_playing(),
            speed_multiplier: self.clock.speed(),
        }
    }

    /// Registers a callback for every non-empty batch.
    ///
    /// The callback runs synchronously inside `tick`/`seek` and must not call
    /// back into this engine.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Batch) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Registry used for dispatch, for adapters that need to clone it.
    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Fleet counters and per-trip progress, computed from delivery state.
    pub fn fleet_status(&self) -> FleetStatus {
        FleetStatus::from_store(&self.store)
    }

    /// Last delivered position per started trip.
    pub fn last_positions(&self) -> Vec<LastPosition> {
        self.store.last_positions()
    }

    /// Read access to the loaded trips.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    fn dispatch_due(&mut self, now: DateTime<Utc>) -> Option<Batch> {
        let events = self.store.take_due(now);
        if events.is_empty() {
            return None;
        }

        let batch = Batch { now, events };
        let notified = self.subscribers.notify(&batch);
        metrics::counter!("fleetreplay_batches_dispatched_total").increment(1);
        metrics::counter!("fleetreplay_events_delivered_total").increment(batch.len() as u64);
        debug!(%now, events = batch.len(), subscribers = notified, "batch dispatched");
        Some(batch)
    }
}

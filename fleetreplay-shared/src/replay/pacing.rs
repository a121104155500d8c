//! Delay math for the timestamp-paced stream.
//!
//! A paced stream emits events one at a time and waits between them for the
//! original gap divided by the speed, never less than a floor. The policy is
//! pure so it can be tested without timers.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::clock::{DEFAULT_SPEED, validate_speed};
use crate::models::{ReplayError, TripEvent};

/// Wait before the first event.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
/// Floor for every inter-event wait.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(10);
/// Wait after the last event, before the end marker.
pub const DEFAULT_TERMINAL_DELAY: Duration = Duration::from_millis(50);

/// Timing parameters of one paced stream, fixed when the stream opens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingPolicy {
    speed: f64,
    /// Wait before the first event.
    pub initial_delay: Duration,
    /// Lower bound for waits between events.
    pub min_delay: Duration,
    /// Wait after the last event.
    pub terminal_delay: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            initial_delay: DEFAULT_INITIAL_DELAY,
            min_delay: DEFAULT_MIN_DELAY,
            terminal_delay: DEFAULT_TERMINAL_DELAY,
        }
    }
}

impl PacingPolicy {
    /// Default delays at the given speed.
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidSpeed`] if `speed` is not positive and finite.
    pub fn with_speed(speed: f64) -> Result<Self, ReplayError> {
        Ok(Self {
            speed: validate_speed(speed)?,
            ..Self::default()
        })
    }

    /// Replaces the fixed delays.
    #[must_use]
    pub fn with_delays(mut self, initial: Duration, min: Duration, terminal: Duration) -> Self {
        self.initial_delay = initial;
        self.min_delay = min;
        self.terminal_delay = terminal;
        self
    }

    /// Speed ratio applied to gaps.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// How long to wait after emitting an event at `current`.
    ///
    /// With a following event this is `max(min_delay, gap / speed)`; after the
    /// last event it is the terminal delay.
    pub fn delay_between(&self, current: DateTime<Utc>, next: Option<DateTime<Utc>>) -> Duration {
        let Some(next) = next else {
            return self.terminal_delay;
        };
        let gap = (next - current).to_std().unwrap_or(Duration::ZERO);
        let scaled = Duration::try_from_secs_f64(gap.as_secs_f64() / self.speed)
            .unwrap_or(Duration::MAX);
        scaled.max(self.min_delay)
    }

    /// Waits following each event of an already sorted slice.
    pub fn schedule(&self, events: &[TripEvent]) -> Vec<Duration> {
        events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                let next = events.get(index + 1).map(|next| next.timestamp);
                self.delay_between(event.timestamp, next)
            })
            .collect()
    }
}

/// Stable ascending sort by timestamp; ties keep input order.
pub fn sort_by_timestamp(events: &mut [TripEvent]) {
    events.sort_by_key(|event| event.timestamp);
}

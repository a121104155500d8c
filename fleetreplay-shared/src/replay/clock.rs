//! Virtual clock decoupled from wall-clock time.
//!
//! The clock never reads the system time itself: every operation that needs
//! "now" takes the real instant as an argument, which keeps advancing
//! deterministic under test and lets any tick source drive it.

use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::ReplayError;

/// Speed used when nothing else is configured.
pub const DEFAULT_SPEED: f64 = 1.0;

/// Checks that `speed` is usable as a multiplier or divisor.
///
/// # Errors
/// Returns [`ReplayError::InvalidSpeed`] for zero, negative, NaN or infinite values.
pub fn validate_speed(speed: f64) -> Result<f64, ReplayError> {
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err(ReplayError::InvalidSpeed(speed))
    }
}

/// Scales a real elapsed duration into virtual time.
#[allow(clippy::cast_possible_truncation)]
pub fn scale_elapsed(elapsed: Duration, speed: f64) -> TimeDelta {
    let micros = (elapsed.as_secs_f64() * speed * 1_000_000.0).round();
    // `as` saturates on overflow.
    TimeDelta::microseconds(micros as i64)
}

/// `{ currentTime, speedMultiplier, playing }` plus the real-time reference
/// used to measure tick deltas.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    current: Option<DateTime<Utc>>,
    speed: f64,
    playing: bool,
    last_real_tick: Option<Instant>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self {
            current: None,
            speed: DEFAULT_SPEED,
            playing: false,
            last_real_tick: None,
        }
    }
}

impl VirtualClock {
    /// A stopped clock with no current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stopped clock with a custom speed.
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidSpeed`] if `speed` is not positive and finite.
    pub fn with_speed(speed: f64) -> Result<Self, ReplayError> {
        Ok(Self {
            speed: validate_speed(speed)?,
            ..Self::default()
        })
    }

    /// Current virtual time, `None` until data has been loaded.
    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.current
    }

    /// Speed multiplier.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Whether ticks currently advance the clock.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Moves the clock to `time` and stops it.
    pub fn reset_to(&mut self, time: Option<DateTime<Utc>>) {
        self.current = time;
        self.playing = false;
        self.last_real_tick = None;
    }

    /// Moves the clock to `time` without touching the playing state.
    pub fn jump_to(&mut self, time: DateTime<Utc>) {
        self.current = Some(time);
    }

    /// Starts playing from `real_now`.
    ///
    /// Returns `false` and stays stopped when there is no current time.
    pub fn start(&mut self, real_now: Instant) -> bool {
        if self.current.is_none() {
            return false;
        }
        self.playing = true;
        self.last_real_tick = Some(real_now);
        true
    }

    /// Stops advancing.
    pub fn pause(&mut self) {
        self.playing = false;
        self.last_real_tick = None;
    }

    /// Changes the multiplier for subsequent ticks.
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidSpeed`] and keeps the previous value if
    /// `speed` is not positive and finite.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), ReplayError> {
        self.speed = validate_speed(speed)?;
        Ok(())
    }

    /// Shifts the clock by a signed number of milliseconds.
    ///
    /// Returns the new time, or `None` when there is no current time.
    pub fn offset(&mut self, offset_ms: i64) -> Option<DateTime<Utc>> {
        let current = self.current?;
        let shifted = TimeDelta::try_milliseconds(offset_ms)
            .and_then(|delta| current.checked_add_signed(delta))
            .unwrap_or(current);
        self.current = Some(shifted);
        self.current
    }

    /// Advances by `(real_now - last tick) * speed`.
    ///
    /// Returns the new time, or `None` when stopped or without data.
    pub fn advance(&mut self, real_now: Instant) -> Option<DateTime<Utc>> {
        if !self.playing {
            return None;
        }
        let current = self.current?;
        let last = self.last_real_tick.replace(real_now).unwrap_or(real_now);
        let delta = scale_elapsed(real_now.saturating_duration_since(last), self.speed);
        let advanced = current.checked_add_signed(delta).unwrap_or(current);
        self.current = Some(advanced);
        self.current
    }
}

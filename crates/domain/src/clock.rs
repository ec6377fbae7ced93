//! Simulated clock — the single source of "now" for an engine instance.
//!
//! The clock only moves forward. Pausing suspends the auto-advance worker
//! but never blocks a manual advance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    current_time: DateTime<Utc>,
    is_paused: bool,
    time_scale: f64,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current_time: start,
            is_paused: false,
            time_scale: 1.0,
        }
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Move the clock to `target`. Backwards motion is rejected.
    pub fn set(&mut self, target: DateTime<Utc>) -> Result<()> {
        if target < self.current_time {
            return Err(Error::conflict(format!(
                "cannot move time backwards: {} < {}",
                target.to_rfc3339(),
                self.current_time.to_rfc3339()
            )));
        }
        self.current_time = target;
        Ok(())
    }

    /// Advance by a positive (possibly fractional) number of seconds.
    pub fn advance_seconds(&mut self, seconds: f64) -> Result<DateTime<Utc>> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(Error::validation("seconds must be a positive number"));
        }
        self.current_time += Duration::microseconds((seconds * 1_000_000.0).round() as i64);
        Ok(self.current_time)
    }

    /// Force the clock to an arbitrary instant, including backwards.
    ///
    /// Only `clear(reset_time_to=...)` uses this; every normal path goes
    /// through [`SimClock::set`].
    pub fn force_set(&mut self, target: DateTime<Utc>) {
        self.current_time = target;
    }

    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    pub fn set_scale(&mut self, scale: f64) -> Result<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(Error::validation("time scale must be a positive number"));
        }
        self.time_scale = scale;
        Ok(())
    }

    /// Consistency check, surfaced through environment validation with a
    /// `time_state:` prefix.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            errors.push(format!("time_scale must be positive, got {}", self.time_scale));
        }
        errors
    }
}

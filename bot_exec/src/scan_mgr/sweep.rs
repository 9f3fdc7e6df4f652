//! # Z sweep target generation
//!
//! A sweep pass visits every Z capture position between the configured
//! bounds. Pass direction alternates so the carriage never wastes a full
//! stroke returning to the start, and the schedule is a pure function of the
//! bounds and step so a given config always produces the same motion.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Direction of one sweep pass over the Z range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepDir {
    /// From `z_min` towards `z_max`
    Up,

    /// From `z_max` towards `z_min`
    Down,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SweepDir {
    pub fn flip(self) -> Self {
        match self {
            SweepDir::Up => SweepDir::Down,
            SweepDir::Down => SweepDir::Up,
        }
    }
}

impl fmt::Display for SweepDir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SweepDir::Up => write!(f, "up"),
            SweepDir::Down => write!(f, "down"),
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the ordered Z targets of one sweep pass.
///
/// A pass holds `floor((z_max - z_min) / z_step) + 1` targets. When the step
/// does not divide the range a down pass still starts at `z_max`, so its
/// targets are offset from the up pass's.
///
/// Returns an empty schedule for a degenerate config (non-positive step or
/// inverted bounds), callers validate before sweeping.
pub fn z_targets(dir: SweepDir, z_min: f64, z_max: f64, z_step: f64) -> Vec<f64> {
    if z_step <= 0.0 || z_max < z_min {
        return Vec::new();
    }

    let count = ((z_max - z_min) / z_step).floor() as usize + 1;

    (0..count)
        .map(|i| {
            let offset = i as f64 * z_step;
            let target = match dir {
                SweepDir::Up => z_min + offset,
                SweepDir::Down => z_max - offset,
            };

            // Float steps can land a hair outside the bounds
            target.max(z_min).min(z_max)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

//! # Scan manager parameters
//!
//! Loaded from `scan_mgr.toml`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the scan manager.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanMgrParams {
    /// Default scan time budget. Units: seconds
    pub default_duration_s: f64,

    /// Lowest Z target of a sweep pass. Units: millimeters
    pub z_min_mm: f64,

    /// Highest Z target of a sweep pass. Units: millimeters
    pub z_max_mm: f64,

    /// Default Z spacing between capture positions. Units: millimeters
    pub default_z_step_mm: f64,

    /// Z step rate used between capture positions. Units: hertz
    pub z_rate_hz: f64,

    /// Rotation duty during a scan, slow enough to capture sharp frames.
    /// Units: percent
    pub theta_duty_pct: f64,

    /// R extension used to reach a diseased leaf. Units: millimeters
    pub r_extend_mm: f64,

    /// Pause after a Z move before capturing, lets vibration die down.
    /// Units: seconds
    pub settle_time_s: f64,

    /// Default disease confidence needed to act. Units: probability
    pub default_disease_threshold: f64,

    /// Confidence below which a frame is treated as empty. Units: probability
    pub min_confidence: f64,

    /// Gripper close hold during a removal cut. Units: seconds
    pub cut_time_s: f64,

    /// Pause after the pre-scan gripper/R preparation. Units: seconds
    pub prep_pause_s: f64,

    /// Short pause between removal steps. Units: seconds
    pub removal_pause_short_s: f64,

    /// Long pause between removal steps. Units: seconds
    pub removal_pause_long_s: f64,

    /// Poll interval while waiting out a rotation-only scan. Units: seconds
    pub observe_poll_s: f64,

    /// After every Nth completed removal the R retract becomes a full home,
    /// resetting open-loop drift. Omit to never re-home mid-scan.
    pub r_rehome_after_removals: Option<u32>,
}

//! # Scan report accumulation
//!
//! One [`ScanReport`] is built per scan invocation and owned by the manager
//! until it is finalized and handed back (and saved into the session
//! directory). Position records are immutable once appended.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanOutcome {
    /// Ran its full time budget
    Completed,

    /// Operator cancellation took the early return-home path
    Cancelled,

    /// A fatal error cut the scan short
    Aborted { reason: String },
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One record per capture position visited during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanPosition {
    /// Sequence number, monotonic within one scan
    pub scan_id: u32,

    /// Z position at capture time. Units: millimeters
    pub z_mm: f64,

    /// Time since scan start. Units: seconds
    pub elapsed_s: f64,

    /// Captured frame, `None` when capture failed
    pub image: Option<PathBuf>,

    /// Top species classification, "Unknown" when unavailable
    pub herb_label: String,
    pub herb_confidence: f64,

    /// Disease decision for this frame
    pub disease_label: String,
    pub disease_confidence: f64,
    pub is_diseased: bool,

    /// Set when capture, classification or removal failed here
    pub error: Option<String>,
}

/// Full record of one scan invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Scan start time
    #[serde(with = "chrono::serde::ts_seconds")]
    pub started: DateTime<Utc>,

    pub outcome: ScanOutcome,

    /// Whether the end-of-scan re-home succeeded
    pub return_home_ok: bool,

    /// Frames attempted, including failed captures
    pub total_images: u32,

    /// Positions flagged diseased
    pub diseased_count: u32,

    /// Removal sub-sequences that completed in full
    pub cuts_performed: u32,

    /// Per-position records in capture order
    pub positions: Vec<ScanPosition>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScanReport {
    /// Fresh report stamped with the current time. The outcome starts as
    /// [`ScanOutcome::Completed`] and is overwritten if the scan ends any
    /// other way.
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
            outcome: ScanOutcome::Completed,
            return_home_ok: true,
            total_images: 0,
            diseased_count: 0,
            cuts_performed: 0,
            positions: Vec::new(),
        }
    }
}

impl Default for ScanReport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScanOutcome::Completed => write!(f, "completed"),
            ScanOutcome::Cancelled => write!(f, "cancelled"),
            ScanOutcome::Aborted { reason } => write!(f, "aborted: {}", reason),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

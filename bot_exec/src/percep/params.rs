//! # Perception parameters
//!
//! Loaded from `percep.toml`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the perception module.
#[derive(Debug, Clone, Deserialize)]
pub struct PercepParams {
    /// Still camera capture process
    pub camera: CameraParams,

    /// Herb species classifier. Omit to run capture-only.
    pub species: Option<ClassifierParams>,

    /// Disease classifier. Omit to run capture-only.
    pub disease: Option<ClassifierParams>,

    /// A label ending in this suffix with no disease keyword in it is a
    /// healthy leaf. Matched case-insensitively.
    pub healthy_label_suffix: String,

    /// Substrings marking a disease condition in a label. Matched
    /// case-insensitively.
    pub disease_keywords: Vec<String>,
}

/// Parameters for the still camera capture process.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraParams {
    /// Capture command to invoke
    pub command: String,

    /// Capture width. Units: pixels
    pub width: u32,

    /// Capture height. Units: pixels
    pub height: u32,

    /// Capture time passed to the command (`-t`). Units: milliseconds
    pub capture_timeout_ms: u32,

    /// Deadline on the whole capture process. Units: seconds
    pub proc_timeout_s: f64,

    /// Directory under the software root where frames are written
    pub captures_dir: String,
}

/// Parameters for one external classifier process.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierParams {
    /// Command and leading arguments to invoke. The image path and top-K
    /// request are appended per call.
    pub command: Vec<String>,

    /// Deadline on the classifier process. Units: seconds
    pub proc_timeout_s: f64,
}

//! # Frame source
//!
//! Capture runs behind the [`FrameSource`] trait. The production camera
//! shells out to `libcamera-still` and probes the written file, so a dead
//! camera or a truncated write surfaces here as a capture error rather than
//! as a classifier failure later.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::Utc;
use log::debug;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

// Internal imports
use super::params::CameraParams;
use super::{run_with_deadline, PercepError};
use util::session::TIMESTAMP_FORMAT;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Still camera capturing one frame per call through an external process.
pub struct StillCamera {
    params: CameraParams,
    captures_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of captured frames.
pub trait FrameSource: Send {
    /// Capture one frame, returning the path it was written to. The scan id
    /// and Z position are baked into the file name.
    fn capture(&mut self, scan_id: u32, z_mm: f64) -> Result<PathBuf, PercepError>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl StillCamera {
    pub fn new(params: CameraParams, captures_dir: PathBuf) -> Self {
        Self {
            params,
            captures_dir,
        }
    }
}

impl FrameSource for StillCamera {
    fn capture(&mut self, scan_id: u32, z_mm: f64) -> Result<PathBuf, PercepError> {
        let path = self.captures_dir.join(frame_name(scan_id, z_mm));

        let mut cmd = Command::new(&self.params.command);
        cmd.arg("-o")
            .arg(&path)
            .arg("--width")
            .arg(self.params.width.to_string())
            .arg("--height")
            .arg(self.params.height.to_string())
            .arg("--nopreview")
            .arg("-t")
            .arg(self.params.capture_timeout_ms.to_string());

        debug!("Capturing frame to {:?}", path);

        run_with_deadline(
            "capture",
            cmd,
            Duration::from_secs_f64(self.params.proc_timeout_s),
        )?;

        // Dimension probe catches truncated or empty writes
        image::image_dimensions(&path)
            .map_err(|e| PercepError::BadImage(path.clone(), e.to_string()))?;

        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn frame_name(scan_id: u32, z_mm: f64) -> String {
    format!(
        "scan_{:03}_z{:03}_{}.jpg",
        scan_id,
        z_mm.round() as i64,
        Utc::now().format(TIMESTAMP_FORMAT)
    )
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frame_name() {
        let name = frame_name(7, 150.0);

        assert!(name.starts_with("scan_007_z150_"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_frame_name_pads_low_values() {
        let name = frame_name(0, 0.0);

        assert!(name.starts_with("scan_000_z000_"));
    }
}

//! # Perception module
//!
//! Everything between the scan loop and the outside world's pixels: frame
//! capture, the two classifier seams (herb species and disease), and the
//! disease-verdict decision.
//!
//! Capture and inference both run as external processes under a deadline, so
//! a wedged camera or accelerator stick costs one frame and never hangs a
//! scan. When a classifier is not configured the module degrades to
//! capture-only operation.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod camera;
pub mod classifier;
pub mod params;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use self::camera::{FrameSource, StillCamera};
pub use self::classifier::{Classifier, Prediction, ProcClassifier};
pub use self::params::PercepParams;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::warn;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

// Internal imports
use util::host;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Poll interval while waiting on a child process.
const PROC_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors raised by the perception module.
#[derive(Error, Debug)]
pub enum PercepError {
    #[error("The software root environment variable (HERBOT_SW_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot create the captures directory {0:?}: {1}")]
    CapturesDirError(PathBuf, std::io::Error),

    #[error("The {0} classifier command is empty")]
    EmptyCommand(String),

    #[error("Could not spawn the {name} process: {source}")]
    SpawnError {
        name: String,
        source: std::io::Error,
    },

    #[error("The {name} process exceeded its {timeout_s} s deadline and was killed")]
    ProcTimeout { name: String, timeout_s: f64 },

    #[error("Could not wait on the {name} process: {source}")]
    ProcWaitError {
        name: String,
        source: std::io::Error,
    },

    #[error("The {name} process exited with code {code:?}: {stderr}")]
    ProcFailed {
        name: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Captured file {0:?} does not decode as an image: {1}")]
    BadImage(PathBuf, String),

    #[error("Malformed classifier output: {0}")]
    MalformedOutput(String),

    #[error("The classifier returned no predictions")]
    EmptyPredictions,

    #[error("Cannot list the captures directory: {0}")]
    CapturesScanError(std::io::Error),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The disease-detection decision for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiseaseVerdict {
    pub is_diseased: bool,
    pub confidence: f64,
    pub label: String,
}

/// The perception set: one frame source plus the two classifier seams.
pub struct Percep {
    camera: Box<dyn FrameSource>,
    species: Option<Box<dyn Classifier>>,
    disease: Option<Box<dyn Classifier>>,
    params: PercepParams,
    captures_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DiseaseVerdict {
    /// Verdict used when no disease classifier is available.
    pub fn unknown() -> Self {
        Self {
            is_diseased: false,
            confidence: 0.0,
            label: "Unknown".into(),
        }
    }
}

impl Percep {
    /// Build the perception set from parameters, creating the captures
    /// directory under the software root.
    pub fn new(params: PercepParams) -> Result<Self, PercepError> {
        let captures_dir = host::get_herbot_sw_root()
            .map_err(|_| PercepError::SwRootNotSet)?
            .join(&params.camera.captures_dir);

        fs::create_dir_all(&captures_dir)
            .map_err(|e| PercepError::CapturesDirError(captures_dir.clone(), e))?;

        let camera = StillCamera::new(params.camera.clone(), captures_dir.clone());

        let species: Option<Box<dyn Classifier>> = match &params.species {
            Some(p) => Some(Box::new(ProcClassifier::new("species", p)?)),
            None => {
                warn!("No species classifier configured, scans will not identify herbs");
                None
            }
        };

        let disease: Option<Box<dyn Classifier>> = match &params.disease {
            Some(p) => Some(Box::new(ProcClassifier::new("disease", p)?)),
            None => {
                warn!("No disease classifier configured, scans will run capture-only");
                None
            }
        };

        Ok(Self {
            camera: Box::new(camera),
            species,
            disease,
            params,
            captures_dir,
        })
    }

    /// Build the perception set from explicit parts.
    pub fn with_parts(
        camera: Box<dyn FrameSource>,
        species: Option<Box<dyn Classifier>>,
        disease: Option<Box<dyn Classifier>>,
        params: PercepParams,
        captures_dir: PathBuf,
    ) -> Self {
        Self {
            camera,
            species,
            disease,
            params,
            captures_dir,
        }
    }

    /// Capture one frame, returning its path.
    pub fn capture(&mut self, scan_id: u32, z_mm: f64) -> Result<PathBuf, PercepError> {
        self.camera.capture(scan_id, z_mm)
    }

    /// Identify the herb species on the frame. Without a configured
    /// classifier this returns an empty ranking.
    pub fn classify_species(
        &mut self,
        image: &Path,
        top_k: usize,
    ) -> Result<Vec<Prediction>, PercepError> {
        match &mut self.species {
            Some(classifier) => classifier.classify(image, top_k),
            None => Ok(vec![]),
        }
    }

    /// Run the disease decision over the frame's top prediction.
    pub fn classify_disease(
        &mut self,
        image: &Path,
        threshold: f64,
        min_confidence: f64,
    ) -> Result<DiseaseVerdict, PercepError> {
        let classifier = match &mut self.disease {
            Some(classifier) => classifier,
            None => return Ok(DiseaseVerdict::unknown()),
        };

        let preds = classifier.classify(image, 1)?;
        let top = preds.first().ok_or(PercepError::EmptyPredictions)?;

        Ok(disease_verdict(
            top,
            threshold,
            min_confidence,
            &self.params.healthy_label_suffix,
            &self.params.disease_keywords,
        ))
    }

    /// Re-run the disease decision over the `count` most recent captured
    /// frames, newest first. Frames that fail to classify are skipped with a
    /// warning.
    pub fn analyze_recent(
        &mut self,
        count: usize,
        threshold: f64,
        min_confidence: f64,
    ) -> Result<Vec<(PathBuf, DiseaseVerdict)>, PercepError> {
        let mut frames: Vec<(PathBuf, SystemTime)> = Vec::new();

        for entry in fs::read_dir(&self.captures_dir).map_err(PercepError::CapturesScanError)? {
            let entry = entry.map_err(PercepError::CapturesScanError)?;
            let path = entry.path();

            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !(name.starts_with("scan_") && name.ends_with(".jpg")) {
                continue;
            }

            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(PercepError::CapturesScanError)?;

            frames.push((path, modified));
        }

        frames.sort_by(|a, b| b.1.cmp(&a.1));
        frames.truncate(count);

        let mut verdicts = Vec::new();

        for (path, _) in frames {
            match self.classify_disease(&path, threshold, min_confidence) {
                Ok(verdict) => verdicts.push((path, verdict)),
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }

        Ok(verdicts)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Decide whether a frame shows disease from the classifier's top prediction.
///
/// Below `min_confidence` the frame is treated as empty or background and the
/// label is tagged accordingly. Otherwise a label is healthy when it ends
/// with the healthy suffix and contains no disease keyword, and diseased when
/// it is not healthy and its confidence reaches `threshold`.
///
/// A non-healthy label with confidence between `min_confidence` and
/// `threshold` is left unflagged. That zone may be an unintended false
/// negative band and is kept as-is pending review.
pub fn disease_verdict(
    top: &Prediction,
    threshold: f64,
    min_confidence: f64,
    healthy_suffix: &str,
    keywords: &[String],
) -> DiseaseVerdict {
    if top.confidence < min_confidence {
        return DiseaseVerdict {
            is_diseased: false,
            confidence: top.confidence,
            label: format!("No clear detection ({})", top.label),
        };
    }

    let label_lower = top.label.to_lowercase();

    let has_keyword = keywords
        .iter()
        .any(|keyword| label_lower.contains(&keyword.to_lowercase()));
    let is_healthy = label_lower.ends_with(&healthy_suffix.to_lowercase()) && !has_keyword;

    DiseaseVerdict {
        is_diseased: !is_healthy && top.confidence >= threshold,
        confidence: top.confidence,
        label: top.label.clone(),
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Run a child process to completion under a deadline, killing it if the
/// deadline passes.
pub(crate) fn run_with_deadline(
    name: &str,
    mut cmd: Command,
    timeout: Duration,
) -> Result<Output, PercepError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| PercepError::SpawnError {
        name: name.into(),
        source,
    })?;

    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PercepError::ProcTimeout {
                        name: name.into(),
                        timeout_s: timeout.as_secs_f64(),
                    });
                }

                thread::sleep(PROC_POLL);
            }
            Err(source) => {
                return Err(PercepError::ProcWaitError {
                    name: name.into(),
                    source,
                })
            }
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|source| PercepError::ProcWaitError {
            name: name.into(),
            source,
        })?;

    if !output.status.success() {
        return Err(PercepError::ProcFailed {
            name: name.into(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(output)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::params::*;
    use super::*;

    fn keywords() -> Vec<String> {
        [
            "blight",
            "spot",
            "rust",
            "scab",
            "mildew",
            "virus",
            "mold",
            "bacterial",
            "spider",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn verdict(label: &str, confidence: f64) -> DiseaseVerdict {
        disease_verdict(
            &Prediction {
                label: label.into(),
                confidence,
            },
            0.6,
            0.4,
            "leaf",
            &keywords(),
        )
    }

    fn test_params() -> PercepParams {
        PercepParams {
            camera: CameraParams {
                command: "libcamera-still".into(),
                width: 640,
                height: 480,
                capture_timeout_ms: 100,
                proc_timeout_s: 5.0,
                captures_dir: "captures".into(),
            },
            species: None,
            disease: None,
            healthy_label_suffix: "leaf".into(),
            disease_keywords: keywords(),
        }
    }

    struct NullCamera;

    impl FrameSource for NullCamera {
        fn capture(&mut self, _scan_id: u32, _z_mm: f64) -> Result<PathBuf, PercepError> {
            Ok(PathBuf::from("null.jpg"))
        }
    }

    struct ConstClassifier {
        label: &'static str,
        confidence: f64,
    }

    impl Classifier for ConstClassifier {
        fn classify(&mut self, _: &Path, _: usize) -> Result<Vec<Prediction>, PercepError> {
            Ok(vec![Prediction {
                label: self.label.into(),
                confidence: self.confidence,
            }])
        }
    }

    #[test]
    fn test_healthy_leaf_not_diseased() {
        let v = verdict("Tomato leaf", 0.92);

        assert!(!v.is_diseased);
        assert_eq!(v.label, "Tomato leaf");
    }

    #[test]
    fn test_disease_label_above_threshold() {
        let v = verdict("Tomato Early blight leaf", 0.87);

        assert!(v.is_diseased);
        assert!((v.confidence - 0.87).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_filtered() {
        let v = verdict("Strawberry leaf", 0.3);

        assert!(!v.is_diseased);
        assert_eq!(v.label, "No clear detection (Strawberry leaf)");
        assert!((v.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_past_filter_evaluated_as_healthy() {
        // 0.45 passes the min confidence filter and reads as a healthy leaf
        let v = verdict("Apple leaf", 0.45);

        assert!(!v.is_diseased);
        assert_eq!(v.label, "Apple leaf");
    }

    #[test]
    fn test_ambiguous_zone_not_flagged() {
        // Disease label below the action threshold stays unflagged
        let v = verdict("Corn rust leaf", 0.55);

        assert!(!v.is_diseased);
    }

    #[test]
    fn test_keyword_match_case_insensitive() {
        let v = verdict("POTATO EARLY BLIGHT LEAF", 0.9);

        assert!(v.is_diseased);
    }

    #[test]
    fn test_no_classifiers_degrades() {
        let mut percep = Percep::with_parts(
            Box::new(NullCamera),
            None,
            None,
            test_params(),
            PathBuf::from("captures"),
        );

        let verdict = percep
            .classify_disease(Path::new("x.jpg"), 0.6, 0.4)
            .unwrap();
        assert_eq!(verdict, DiseaseVerdict::unknown());

        let species = percep.classify_species(Path::new("x.jpg"), 1).unwrap();
        assert!(species.is_empty());
    }

    #[test]
    fn test_analyze_recent_limits_and_filters() {
        let dir = tempfile::tempdir().unwrap();

        for name in &[
            "scan_000_z000_a.jpg",
            "scan_001_z100_a.jpg",
            "scan_002_z200_a.jpg",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"img").unwrap();
            thread::sleep(Duration::from_millis(5));
        }

        let mut percep = Percep::with_parts(
            Box::new(NullCamera),
            None,
            Some(Box::new(ConstClassifier {
                label: "Tomato Early blight leaf",
                confidence: 0.9,
            })),
            test_params(),
            dir.path().to_path_buf(),
        );

        let verdicts = percep.analyze_recent(2, 0.6, 0.4).unwrap();

        assert_eq!(verdicts.len(), 2);
        // Newest first
        assert!(verdicts[0].0.ends_with("scan_002_z200_a.jpg"));
        assert!(verdicts[1].0.ends_with("scan_001_z100_a.jpg"));
        assert!(verdicts[0].1.is_diseased);
    }
}

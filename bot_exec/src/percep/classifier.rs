//! # Classifier seam
//!
//! Inference runs behind the [`Classifier`] trait. The production
//! implementation shells out to an external inference process (the models are
//! quantized for an accelerator stick and owned by a separate tool), so the
//! rest of the software only ever sees ranked `(label, confidence)` pairs.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

// Internal imports
use super::params::ClassifierParams;
use super::{run_with_deadline, PercepError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One ranked classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

/// Classifier backed by an external inference process.
///
/// The process is invoked as `<command...> <image> --top-k <k>` and must
/// print a JSON array of `[label, confidence]` pairs on stdout, sorted
/// descending by confidence.
pub struct ProcClassifier {
    name: String,
    program: String,
    args: Vec<String>,
    proc_timeout: Duration,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// An image classifier returning ranked predictions.
pub trait Classifier: Send {
    /// Classify the image, returning at most `top_k` predictions sorted
    /// descending by confidence.
    fn classify(&mut self, image: &Path, top_k: usize) -> Result<Vec<Prediction>, PercepError>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ProcClassifier {
    pub fn new(name: &str, params: &ClassifierParams) -> Result<Self, PercepError> {
        let (program, args) = params
            .command
            .split_first()
            .ok_or_else(|| PercepError::EmptyCommand(name.into()))?;

        Ok(Self {
            name: name.into(),
            program: program.clone(),
            args: args.to_vec(),
            proc_timeout: Duration::from_secs_f64(params.proc_timeout_s),
        })
    }
}

impl Classifier for ProcClassifier {
    fn classify(&mut self, image: &Path, top_k: usize) -> Result<Vec<Prediction>, PercepError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(image)
            .arg("--top-k")
            .arg(top_k.to_string());

        debug!("Running {} classifier on {:?}", self.name, image);

        let output = run_with_deadline(&self.name, cmd, self.proc_timeout)?;

        parse_predictions(&output.stdout)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse classifier process output, a JSON array of `[label, confidence]`
/// pairs.
pub fn parse_predictions(raw: &[u8]) -> Result<Vec<Prediction>, PercepError> {
    let pairs: Vec<(String, f64)> =
        serde_json::from_slice(raw).map_err(|e| PercepError::MalformedOutput(e.to_string()))?;

    Ok(pairs
        .into_iter()
        .map(|(label, confidence)| Prediction { label, confidence })
        .collect())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_predictions() {
        let raw = br#"[["Tomato leaf", 0.92], ["Basil leaf", 0.05]]"#;

        let preds = parse_predictions(raw).unwrap();

        assert_eq!(
            preds,
            vec![
                Prediction {
                    label: "Tomato leaf".into(),
                    confidence: 0.92
                },
                Prediction {
                    label: "Basil leaf".into(),
                    confidence: 0.05
                }
            ]
        );
    }

    #[test]
    fn test_parse_predictions_malformed() {
        assert!(parse_predictions(b"not json").is_err());
        assert!(parse_predictions(br#"{"label": 0.9}"#).is_err());
        assert!(parse_predictions(br#"[["missing confidence"]]"#).is_err());
    }

    #[test]
    fn test_empty_command_rejected() {
        let params = ClassifierParams {
            command: vec![],
            proc_timeout_s: 5.0,
        };

        assert!(ProcClassifier::new("species", &params).is_err());
    }
}

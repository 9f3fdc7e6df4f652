//! # Scan manager
//!
//! The scan state machine. One scan invocation runs:
//!
//! ```text
//! Idle -> Homing -> Sweeping <-> Classifying
//!                       |             |
//!                       |       RemovingDisease
//!                       v             |
//!                 ReturningHome <-----+
//!                       |
//!                   Reporting -> Idle
//! ```
//!
//! Everything is strictly sequential on the calling thread. The only motion
//! running in the background is the continuous plant rotation, which is
//! stopped before any removal and at the end of the scan. A rotation-only
//! observation scan is the same machine with the sweep and classification
//! steps disabled by config.
//!
//! Per-position failures (capture, inference, removal) are recorded in the
//! report and never abort the scan. Motion failures during the sweep abort
//! it, keeping the partial report. A failure while homing at the start
//! aborts the whole invocation with no report.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;
pub mod report;
pub mod sweep;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use self::params::ScanMgrParams;
pub use self::report::{ScanOutcome, ScanPosition, ScanReport};
pub use self::sweep::SweepDir;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

// Internal imports
use crate::mech::driver::Dir;
use crate::mech::{Mech, MechError};
use crate::percep::Percep;
use self::sweep::z_targets;
use util::session::Session;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Scan type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanMode {
    /// Rotation-only scan: no Z sweep, no inference, no removal
    Observe,

    /// Full sweep with capture, classification and disease removal
    Manage,
}

/// States of the scan state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Homing,
    Sweeping(SweepDir),
    Classifying,
    RemovingDisease,
    ReturningHome,
    Reporting,
}

/// Errors which fail a scan invocation outright. Anything going wrong after
/// the initial homing is recorded in the [`ScanReport`] instead.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("A scan is already running")]
    Busy,

    #[error("Invalid scan config: {0}")]
    InvalidConfig(String),

    #[error("Initial homing failed: {0}")]
    Homing(MechError),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Configuration of one scan invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ScanCfg {
    pub mode: ScanMode,

    /// Time budget. Units: seconds
    pub duration_s: f64,

    /// Lowest Z target of a sweep pass. Units: millimeters
    pub z_min_mm: f64,

    /// Highest Z target of a sweep pass. Units: millimeters
    pub z_max_mm: f64,

    /// Spacing between capture positions. Units: millimeters
    pub z_step_mm: f64,

    /// Z step rate between capture positions. Units: hertz
    pub z_rate_hz: f64,

    /// Rotation direction during the scan
    pub theta_dir: Dir,

    /// Rotation duty during the scan. Units: percent
    pub theta_duty_pct: f64,

    /// R extension used to reach a diseased leaf. Units: millimeters
    pub r_extend_mm: f64,

    /// Pause after a Z move before capturing. Units: seconds
    pub settle_time_s: f64,

    /// Disease confidence needed to act. Units: probability
    pub disease_threshold: f64,

    /// Confidence below which a frame is treated as empty. Units: probability
    pub min_confidence: f64,

    /// Gripper close hold during a removal cut. Units: seconds
    pub cut_time_s: f64,

    /// After every Nth completed removal the R retract becomes a full home
    pub r_rehome_after_removals: Option<u32>,
}

/// Shared flag for cancelling a running scan from another thread, such as a
/// Ctrl-C handler.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

/// The scan manager, exclusively owning the mechanisms and perception sets
/// for the duration of its life.
pub struct ScanMgr {
    mech: Mech,
    percep: Percep,
    params: ScanMgrParams,
    session: Option<Session>,
    busy: Arc<AtomicBool>,
    cancel: CancelHandle,
    state: ScanState,
}

/// Clears the busy flag when a scan invocation ends, on every exit path.
struct BusyGuard(Arc<AtomicBool>);

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScanMode::Observe => write!(f, "observe"),
            ScanMode::Manage => write!(f, "manage"),
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "Idle"),
            ScanState::Homing => write!(f, "Homing"),
            ScanState::Sweeping(dir) => write!(f, "Sweeping ({})", dir),
            ScanState::Classifying => write!(f, "Classifying"),
            ScanState::RemovingDisease => write!(f, "RemovingDisease"),
            ScanState::ReturningHome => write!(f, "ReturningHome"),
            ScanState::Reporting => write!(f, "Reporting"),
        }
    }
}

impl ScanCfg {
    /// Full scan-and-manage config from the parameter defaults.
    pub fn manage(params: &ScanMgrParams) -> Self {
        Self {
            mode: ScanMode::Manage,
            duration_s: params.default_duration_s,
            z_min_mm: params.z_min_mm,
            z_max_mm: params.z_max_mm,
            z_step_mm: params.default_z_step_mm,
            z_rate_hz: params.z_rate_hz,
            theta_dir: Dir::Fwd,
            theta_duty_pct: params.theta_duty_pct,
            r_extend_mm: params.r_extend_mm,
            settle_time_s: params.settle_time_s,
            disease_threshold: params.default_disease_threshold,
            min_confidence: params.min_confidence,
            cut_time_s: params.cut_time_s,
            r_rehome_after_removals: params.r_rehome_after_removals,
        }
    }

    /// Rotation-only scan config.
    pub fn observe(params: &ScanMgrParams) -> Self {
        Self {
            mode: ScanMode::Observe,
            ..Self::manage(params)
        }
    }

    fn validate(&self) -> Result<(), ScanError> {
        if self.duration_s <= 0.0 {
            return Err(ScanError::InvalidConfig(format!(
                "duration must be positive, got {}",
                self.duration_s
            )));
        }

        if self.mode == ScanMode::Manage {
            if self.z_step_mm <= 0.0 {
                return Err(ScanError::InvalidConfig(format!(
                    "Z step must be positive, got {}",
                    self.z_step_mm
                )));
            }
            if self.z_max_mm < self.z_min_mm {
                return Err(ScanError::InvalidConfig(format!(
                    "Z range is inverted ({} to {})",
                    self.z_min_mm, self.z_max_mm
                )));
            }
        }

        Ok(())
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScanMgr {
    pub fn new(
        mech: Mech,
        percep: Percep,
        params: ScanMgrParams,
        session: Option<Session>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            mech,
            percep,
            params,
            session,
            busy: Arc::new(AtomicBool::new(false)),
            cancel,
            state: ScanState::Idle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Run one scan to completion, blocking the calling thread for the whole
    /// duration.
    ///
    /// Returns the report unless the config is invalid, a scan is already
    /// active, or the initial homing fails. Every later failure is recorded
    /// in the report's outcome and per-position records instead.
    pub fn run(&mut self, cfg: ScanCfg) -> Result<ScanReport, ScanError> {
        cfg.validate()?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::Busy);
        }
        let _busy_guard = BusyGuard(self.busy.clone());

        self.cancel.reset();

        info!(
            "Starting {} scan with a {:.0} s budget",
            cfg.mode, cfg.duration_s
        );

        self.set_state(ScanState::Homing);
        if let Err(e) = self.mech.home_all() {
            self.set_state(ScanState::Idle);
            return Err(ScanError::Homing(e));
        }

        let mut report = ScanReport::new();
        let started = Instant::now();

        report.outcome = match cfg.mode {
            ScanMode::Observe => self.observe(&cfg, started),
            ScanMode::Manage => self.manage(&cfg, started, &mut report),
        };

        self.set_state(ScanState::ReturningHome);
        report.return_home_ok = self.return_home();

        self.set_state(ScanState::Reporting);
        info!(
            "Scan {}: {} images, {} diseased, {} cuts",
            report.outcome, report.total_images, report.diseased_count, report.cuts_performed
        );

        if let Some(session) = &self.session {
            session.save_with_timestamp("scan_report.json", report.clone());
        }

        self.set_state(ScanState::Idle);

        Ok(report)
    }

    /// Rotation-only scan: spin the plant for the budget, checking for
    /// cancellation.
    fn observe(&mut self, cfg: &ScanCfg, started: Instant) -> ScanOutcome {
        if let Err(e) = self
            .mech
            .theta
            .start_continuous(cfg.theta_dir, cfg.theta_duty_pct)
        {
            return ScanOutcome::Aborted {
                reason: format!("Could not start rotation: {}", e),
            };
        }

        self.set_state(ScanState::Sweeping(SweepDir::Up));

        while started.elapsed().as_secs_f64() < cfg.duration_s {
            if self.cancel.is_cancelled() {
                info!("Scan cancelled");
                return ScanOutcome::Cancelled;
            }

            pause(self.params.observe_poll_s);
        }

        ScanOutcome::Completed
    }

    /// Full scan: sweep Z while rotating, classify each position and remove
    /// disease, until the budget runs out.
    fn manage(
        &mut self,
        cfg: &ScanCfg,
        started: Instant,
        report: &mut ScanReport,
    ) -> ScanOutcome {
        // Gripper open and arm retracted before the plant starts turning
        if let Err(e) = self.prep() {
            return ScanOutcome::Aborted {
                reason: format!("Scan prep failed: {}", e),
            };
        }
        pause(self.params.prep_pause_s);

        if let Err(e) = self
            .mech
            .theta
            .start_continuous(cfg.theta_dir, cfg.theta_duty_pct)
        {
            return ScanOutcome::Aborted {
                reason: format!("Could not start rotation: {}", e),
            };
        }

        let mut sweep_dir = SweepDir::Up;
        let mut scan_id: u32 = 0;
        let mut completed_removals: u32 = 0;

        'sweep: loop {
            if started.elapsed().as_secs_f64() >= cfg.duration_s {
                break;
            }

            for z_mm in z_targets(sweep_dir, cfg.z_min_mm, cfg.z_max_mm, cfg.z_step_mm) {
                self.set_state(ScanState::Sweeping(sweep_dir));

                if self.cancel.is_cancelled() {
                    info!("Scan cancelled");
                    return ScanOutcome::Cancelled;
                }
                if started.elapsed().as_secs_f64() >= cfg.duration_s {
                    break 'sweep;
                }

                if let Err(e) = self.mech.z.move_to(z_mm, Some(cfg.z_rate_hz)) {
                    return ScanOutcome::Aborted {
                        reason: format!("Z move failed: {}", e),
                    };
                }

                pause(cfg.settle_time_s);

                scan_id += 1;
                self.scan_position(cfg, started, scan_id, z_mm, &mut completed_removals, report);
            }

            sweep_dir = sweep_dir.flip();
        }

        ScanOutcome::Completed
    }

    /// Capture and classify one position, running the removal sub-sequence
    /// if disease is found. Failures here cost this position only.
    fn scan_position(
        &mut self,
        cfg: &ScanCfg,
        started: Instant,
        scan_id: u32,
        z_mm: f64,
        completed_removals: &mut u32,
        report: &mut ScanReport,
    ) {
        self.set_state(ScanState::Classifying);

        let mut position = ScanPosition {
            scan_id,
            z_mm,
            elapsed_s: started.elapsed().as_secs_f64(),
            image: None,
            herb_label: "Unknown".into(),
            herb_confidence: 0.0,
            disease_label: "Unknown".into(),
            disease_confidence: 0.0,
            is_diseased: false,
            error: None,
        };

        report.total_images += 1;

        match self.percep.capture(scan_id, z_mm) {
            Ok(image) => {
                match self.percep.classify_species(&image, 1) {
                    Ok(preds) => {
                        if let Some(top) = preds.first() {
                            position.herb_label = top.label.clone();
                            position.herb_confidence = top.confidence;
                        }
                    }
                    Err(e) => {
                        warn!("Species classification failed at Z {:.0} mm: {}", z_mm, e);
                        position.error = Some(format!("Species classification failed: {}", e));
                    }
                }

                match self
                    .percep
                    .classify_disease(&image, cfg.disease_threshold, cfg.min_confidence)
                {
                    Ok(verdict) => {
                        position.disease_label = verdict.label;
                        position.disease_confidence = verdict.confidence;
                        position.is_diseased = verdict.is_diseased;
                    }
                    Err(e) => {
                        warn!("Disease classification failed at Z {:.0} mm: {}", z_mm, e);
                        position.error = Some(format!("Disease classification failed: {}", e));
                    }
                }

                position.image = Some(image);
            }
            Err(e) => {
                warn!("Capture failed at Z {:.0} mm: {}", z_mm, e);
                position.error = Some(format!("Capture failed: {}", e));
            }
        }

        if position.is_diseased {
            report.diseased_count += 1;

            info!(
                "Disease detected at Z {:.0} mm: {} ({:.0}%)",
                z_mm,
                position.disease_label,
                position.disease_confidence * 100.0
            );

            let rehome_r = cfg
                .r_rehome_after_removals
                .map_or(false, |n| n > 0 && (*completed_removals + 1) % n == 0);

            match self.remove_leaf(cfg, rehome_r) {
                Ok(()) => {
                    report.cuts_performed += 1;
                    *completed_removals += 1;
                }
                Err(e) => {
                    warn!("Removal failed at Z {:.0} mm: {}", z_mm, e);
                    position.error = Some(format!("Removal failed: {}", e));

                    // Rotation must not stay stopped after a failed removal
                    if let Err(e) = self
                        .mech
                        .theta
                        .start_continuous(cfg.theta_dir, cfg.theta_duty_pct)
                    {
                        warn!("Could not resume rotation: {}", e);
                    }
                }
            }
        }

        report.positions.push(position);
    }

    /// The removal sub-sequence: stop rotation, open the gripper, reach out,
    /// cut, release, pull back, resume rotation.
    fn remove_leaf(&mut self, cfg: &ScanCfg, rehome_r: bool) -> Result<(), MechError> {
        self.set_state(ScanState::RemovingDisease);

        let short = self.params.removal_pause_short_s;
        let long = self.params.removal_pause_long_s;

        self.mech.theta.stop()?;
        pause(short);

        self.mech.gripper.open()?;
        pause(short);

        self.mech.r.move_to(cfg.r_extend_mm)?;
        pause(long);

        self.mech.gripper.cut(cfg.cut_time_s)?;
        pause(long);

        self.mech.gripper.open()?;
        pause(short);

        if rehome_r {
            // Periodic drift reset on the open loop axis
            self.mech.r.home()?;
        } else {
            self.mech.r.move_to(0.0)?;
        }
        pause(long);

        self.mech
            .theta
            .start_continuous(cfg.theta_dir, cfg.theta_duty_pct)?;

        Ok(())
    }

    fn prep(&mut self) -> Result<(), MechError> {
        self.mech.gripper.open()?;
        self.mech.r.move_to(0.0)?;
        Ok(())
    }

    /// Best effort end-of-scan recovery: stop rotation, re-home every axis
    /// and leave the gripper open. Failures are logged, never returned, so
    /// they cannot erase a collected report.
    fn return_home(&mut self) -> bool {
        let mut ok = true;

        if let Err(e) = self.mech.theta.stop() {
            warn!("Could not stop rotation: {}", e);
            ok = false;
        }

        if let Err(e) = self.mech.home_all() {
            warn!("End of scan homing failed: {}", e);
            ok = false;
        }

        if let Err(e) = self.mech.gripper.open() {
            warn!("Could not open the gripper: {}", e);
            ok = false;
        }

        ok
    }

    fn set_state(&mut self, state: ScanState) {
        if state != self.state {
            info!("Scan state change to: {}", state);
            self.state = state;
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn pause(duration_s: f64) {
    if duration_s > 0.0 {
        thread::sleep(Duration::from_secs_f64(duration_s));
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mech::params::*;
    use crate::mech::{GripperState, SimHandles, StateStore};
    use crate::percep::params::{CameraParams, PercepParams};
    use crate::percep::{Classifier, FrameSource, PercepError, Prediction};
    use std::path::{Path, PathBuf};

    /// Frame source returning fabricated paths. Optionally fails the Nth
    /// capture, and can trip a cancel handle once N captures have happened
    /// so sweep tests end deterministically.
    struct StubCamera {
        captures: u32,
        fail_on: Option<u32>,
        cancel_after: Option<(u32, CancelHandle)>,
    }

    impl StubCamera {
        fn new() -> Self {
            Self {
                captures: 0,
                fail_on: None,
                cancel_after: None,
            }
        }

        fn cancelling_after(n: u32, handle: CancelHandle) -> Self {
            Self {
                captures: 0,
                fail_on: None,
                cancel_after: Some((n, handle)),
            }
        }
    }

    impl FrameSource for StubCamera {
        fn capture(&mut self, scan_id: u32, z_mm: f64) -> Result<PathBuf, PercepError> {
            self.captures += 1;

            if let Some((n, handle)) = &self.cancel_after {
                if self.captures >= *n {
                    handle.cancel();
                }
            }

            if self.fail_on == Some(self.captures) {
                return Err(PercepError::BadImage(
                    PathBuf::from("stub.jpg"),
                    "injected".into(),
                ));
            }

            Ok(PathBuf::from(format!(
                "scan_{:03}_z{:03}.jpg",
                scan_id, z_mm as i64
            )))
        }
    }

    /// Disease classifier following a script of labels, one per call,
    /// repeating the last entry.
    struct ScriptClassifier {
        script: Vec<(&'static str, f64)>,
        call: usize,
    }

    impl Classifier for ScriptClassifier {
        fn classify(&mut self, _: &Path, _: usize) -> Result<Vec<Prediction>, PercepError> {
            let idx = self.call.min(self.script.len() - 1);
            self.call += 1;

            let (label, confidence) = self.script[idx];
            Ok(vec![Prediction {
                label: label.into(),
                confidence,
            }])
        }
    }

    fn mech_params() -> MechParams {
        MechParams {
            z_axis: ZAxisParams {
                enable_pin: 2,
                step_pin: 3,
                dir_pin: 4,
                steps_per_mm: 4.27,
                min_position_mm: 0.0,
                max_position_mm: 750.0,
                default_rate_hz: 1000.0,
                homing_rate_hz: 800.0,
            },
            r_axis: RAxisParams {
                enable_pin: 12,
                in1_pin: 18,
                in2_pin: 15,
                stby_pin: 23,
                pwm_frequency_hz: 1000.0,
                speed_mm_s: 10.0,
                min_position_mm: 0.0,
                max_position_mm: 50.0,
                home_duration_s: 6.0,
            },
            theta_axis: ThetaParams {
                enable_pin: 25,
                in1_pin: 7,
                in2_pin: 8,
                stby_pin: 1,
                pwm_frequency_hz: 1000.0,
                default_duty_pct: 100.0,
            },
            gripper: GripperParams {
                servo_pin: 13,
                pwm_frequency_hz: 50.0,
                open_angle_deg: 90.0,
                closed_angle_deg: 0.0,
                default_hold_s: 0.5,
                cut_open_hold_s: 0.3,
            },
            home_pause_s: 0.0,
            move_pause_s: 0.0,
            approach_pause_s: 0.0,
            approach_z_rate_hz: 800.0,
            approach_cut_time_s: 1.5,
        }
    }

    fn percep_params() -> PercepParams {
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
            disease_keywords: vec![
                "blight".into(),
                "spot".into(),
                "rust".into(),
                "scab".into(),
                "mildew".into(),
                "virus".into(),
                "mold".into(),
                "bacterial".into(),
                "spider".into(),
            ],
        }
    }

    fn scan_params() -> ScanMgrParams {
        ScanMgrParams {
            default_duration_s: 600.0,
            z_min_mm: 0.0,
            z_max_mm: 700.0,
            default_z_step_mm: 100.0,
            z_rate_hz: 1000.0,
            theta_duty_pct: 3.0,
            r_extend_mm: 30.0,
            settle_time_s: 0.0,
            default_disease_threshold: 0.6,
            min_confidence: 0.4,
            cut_time_s: 1.5,
            prep_pause_s: 0.0,
            removal_pause_short_s: 0.0,
            removal_pause_long_s: 0.0,
            observe_poll_s: 0.0,
            r_rehome_after_removals: None,
        }
    }

    fn test_mgr(
        camera: StubCamera,
        disease_script: Option<Vec<(&'static str, f64)>>,
        cancel: CancelHandle,
    ) -> (ScanMgr, SimHandles, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf()).unwrap();
        let (mech, handles) = Mech::new_sim(mech_params(), store);

        let disease: Option<Box<dyn Classifier>> = disease_script
            .map(|script| Box::new(ScriptClassifier { script, call: 0 }) as Box<dyn Classifier>);

        let percep = Percep::with_parts(
            Box::new(camera),
            None,
            disease,
            percep_params(),
            dir.path().to_path_buf(),
        );

        let mgr = ScanMgr::new(mech, percep, scan_params(), None, cancel);
        (mgr, handles, dir)
    }

    #[test]
    fn test_busy_rejected() {
        let (mut mgr, handles, _dir) = test_mgr(StubCamera::new(), None, CancelHandle::new());
        mgr.busy.store(true, Ordering::SeqCst);

        match mgr.run(ScanCfg::manage(&scan_params())) {
            Err(ScanError::Busy) => (),
            _ => panic!("busy scan was not rejected"),
        }

        // Rejected before any motion
        assert!(handles.r.lock().unwrap().timed.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (mut mgr, handles, _dir) = test_mgr(StubCamera::new(), None, CancelHandle::new());

        let mut cfg = ScanCfg::manage(&scan_params());
        cfg.z_step_mm = 0.0;
        match mgr.run(cfg) {
            Err(ScanError::InvalidConfig(_)) => (),
            _ => panic!("zero step was not rejected"),
        }

        let mut cfg = ScanCfg::manage(&scan_params());
        cfg.duration_s = -1.0;
        assert!(mgr.run(cfg).is_err());

        assert!(handles.r.lock().unwrap().timed.is_empty());
    }

    #[test]
    fn test_homing_failure_is_fatal() {
        let (mut mgr, handles, _dir) = test_mgr(StubCamera::new(), None, CancelHandle::new());

        // First R motion command is the homing retract
        handles.r.lock().unwrap().fail_on = Some(1);

        match mgr.run(ScanCfg::manage(&scan_params())) {
            Err(ScanError::Homing(_)) => (),
            _ => panic!("homing failure did not abort the scan"),
        }

        assert!(!mgr.is_busy());
        assert_eq!(mgr.state, ScanState::Idle);
    }

    #[test]
    fn test_observe_scan_completes() {
        let (mut mgr, handles, _dir) = test_mgr(StubCamera::new(), None, CancelHandle::new());

        let mut cfg = ScanCfg::observe(&scan_params());
        cfg.duration_s = 0.05;

        let report = mgr.run(cfg).unwrap();

        assert_eq!(report.outcome, ScanOutcome::Completed);
        assert_eq!(report.total_images, 0);
        assert!(report.positions.is_empty());
        assert!(report.return_home_ok);

        // Rotation ran at the scan duty and was stopped again
        let theta = handles.theta.lock().unwrap();
        assert_eq!(theta.drives, vec![(Dir::Fwd, 3.0)]);
        assert!(theta.running.is_none());
        drop(theta);

        assert_eq!(mgr.mech.gripper.state(), GripperState::Open);
        assert_eq!(mgr.state, ScanState::Idle);
        assert!(!mgr.is_busy());
    }

    #[test]
    fn test_cancellation_mid_sweep() {
        let cancel = CancelHandle::new();
        let camera = StubCamera::cancelling_after(8, cancel.clone());
        let (mut mgr, handles, _dir) =
            test_mgr(camera, Some(vec![("Tomato leaf", 0.9)]), cancel);

        let report = mgr.run(ScanCfg::manage(&scan_params())).unwrap();

        // Exactly the first up pass was captured before the cancel took hold
        assert_eq!(report.outcome, ScanOutcome::Cancelled);
        assert_eq!(report.total_images, 8);
        assert_eq!(report.positions.len(), 8);
        assert_eq!(report.positions[0].z_mm, 0.0);
        assert_eq!(report.positions[7].z_mm, 700.0);

        assert!(handles.theta.lock().unwrap().running.is_none());
        assert_eq!(mgr.mech.gripper.state(), GripperState::Open);
    }

    #[test]
    fn test_capture_failure_not_fatal() {
        let cancel = CancelHandle::new();
        let mut camera = StubCamera::cancelling_after(8, cancel.clone());
        camera.fail_on = Some(3);
        let (mut mgr, _handles, _dir) =
            test_mgr(camera, Some(vec![("Tomato leaf", 0.9)]), cancel);

        let report = mgr.run(ScanCfg::manage(&scan_params())).unwrap();

        // Position 3 failed, 4 to 8 still processed
        assert_eq!(report.total_images, 8);
        assert_eq!(report.positions.len(), 8);
        assert!(report.positions[2].error.is_some());
        assert!(report.positions[2].image.is_none());
        assert!(report.positions[3].error.is_none());
        assert!(report.positions[3].image.is_some());
    }

    #[test]
    fn test_removal_and_counters() {
        let cancel = CancelHandle::new();
        let camera = StubCamera::cancelling_after(8, cancel.clone());
        let script = vec![
            ("Tomato leaf", 0.9),
            ("Tomato Early blight leaf", 0.87),
            ("Tomato leaf", 0.9),
        ];
        let (mut mgr, handles, _dir) = test_mgr(camera, Some(script), cancel);

        let report = mgr.run(ScanCfg::manage(&scan_params())).unwrap();

        assert_eq!(report.diseased_count, 1);
        assert_eq!(report.cuts_performed, 1);
        assert_eq!(
            report.diseased_count,
            report.positions.iter().filter(|p| p.is_diseased).count() as u32
        );
        assert!(report.cuts_performed <= report.diseased_count);
        assert!(report.positions[1].is_diseased);

        // R: homing retract, removal reach and retract, end of scan re-home
        assert_eq!(
            handles.r.lock().unwrap().timed,
            vec![
                (Dir::Rev, 100.0, 6.0),
                (Dir::Fwd, 100.0, 3.0),
                (Dir::Rev, 100.0, 3.0),
                (Dir::Rev, 100.0, 6.0),
            ]
        );

        // Gripper: prep open, removal open/cut/release, end of scan open
        assert_eq!(
            handles.gripper.lock().unwrap().angles,
            vec![
                (90.0, 0.5),
                (90.0, 0.5),
                (90.0, 0.3),
                (0.0, 1.5),
                (90.0, 0.5),
                (90.0, 0.5),
            ]
        );

        // Rotation stopped for the removal and started twice
        let theta = handles.theta.lock().unwrap();
        assert_eq!(theta.drives.len(), 2);
        assert!(theta.stops >= 2);
    }

    #[test]
    fn test_failed_removal_resumes_rotation() {
        let cancel = CancelHandle::new();
        let camera = StubCamera::cancelling_after(8, cancel.clone());
        let script = vec![("Potato Late blight leaf", 0.95), ("Tomato leaf", 0.9)];
        let (mut mgr, handles, _dir) = test_mgr(camera, Some(script), cancel);

        // Prep open is servo call 1, the removal's open is call 2
        handles.gripper.lock().unwrap().fail_on = Some(2);

        let report = mgr.run(ScanCfg::manage(&scan_params())).unwrap();

        assert_eq!(report.diseased_count, 1);
        assert_eq!(report.cuts_performed, 0);
        assert!(report.positions[0]
            .error
            .as_ref()
            .unwrap()
            .contains("Removal failed"));

        // Sweep carried on to the end of the pass
        assert_eq!(report.positions.len(), 8);

        // Rotation was resumed after the failed removal
        assert_eq!(handles.theta.lock().unwrap().drives.len(), 2);
    }

    #[test]
    fn test_rehome_cadence_replaces_retract() {
        let cancel = CancelHandle::new();
        let camera = StubCamera::cancelling_after(8, cancel.clone());
        let script = vec![
            ("Tomato leaf", 0.9),
            ("Corn Gray leaf spot", 0.9),
            ("Tomato leaf", 0.9),
        ];
        let (mut mgr, handles, _dir) = test_mgr(camera, Some(script), cancel);

        let mut cfg = ScanCfg::manage(&scan_params());
        cfg.r_rehome_after_removals = Some(1);

        mgr.run(cfg).unwrap();

        // The removal retract became a full home
        assert_eq!(
            handles.r.lock().unwrap().timed,
            vec![
                (Dir::Rev, 100.0, 6.0),
                (Dir::Fwd, 100.0, 3.0),
                (Dir::Rev, 100.0, 6.0),
                (Dir::Rev, 100.0, 6.0),
            ]
        );
    }

    #[test]
    fn test_z_failure_aborts_with_partial_report() {
        let (mut mgr, handles, _dir) = test_mgr(
            StubCamera::new(),
            Some(vec![("Tomato leaf", 0.9)]),
            CancelHandle::new(),
        );

        // Z starts homed at zero so the first move is to Z 100, the second
        // to Z 200
        handles.z.lock().unwrap().fail_on = Some(2);

        let report = mgr.run(ScanCfg::manage(&scan_params())).unwrap();

        match &report.outcome {
            ScanOutcome::Aborted { reason } => assert!(reason.contains("Z move failed")),
            other => panic!("expected abort, got {}", other),
        }

        // Positions before the failure survive in the report
        assert_eq!(report.positions.len(), 2);
        assert_eq!(report.total_images, 2);
        assert!(report.return_home_ok);
    }
}

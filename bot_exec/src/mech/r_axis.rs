//! # R axis controller
//!
//! Linear actuator mounted on the Z carriage. The actuator has no position
//! feedback, so position is an estimate integrated from commanded drive time
//! at the nominal speed. The estimate drifts with load and supply voltage;
//! homing retracts against the hard stop for longer than a full stroke takes
//! and re-anchors the estimate at zero.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{info, warn};
use std::time::Duration;

// Internal imports
use super::driver::{Dir, DriverError, HBridgeDriver};
use super::params::RAxisParams;
use super::state_store::{RAxisState, StateStore};
use super::{AxisId, AxisStatus, MechError, PositionMethod};
use util::maths::clamp;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of this axis's document in the state store.
const STATE_NAME: &str = "r_axis";

/// The actuator is always driven at full duty, speed is fixed by the
/// hardware.
const FULL_DUTY_PCT: f64 = 100.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The R axis controller.
pub struct RAxis {
    driver: Box<dyn HBridgeDriver>,
    params: RAxisParams,
    store: StateStore,
    state: RAxisState,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RAxis {
    /// Create the controller, recovering the last persisted estimate.
    pub fn new(driver: Box<dyn HBridgeDriver>, params: RAxisParams, store: StateStore) -> Self {
        let state: RAxisState = store.load(STATE_NAME);

        if state.current_position_mm != 0.0 || state.is_homed {
            info!(
                "Loaded R axis state: {:.1} mm, homed: {}",
                state.current_position_mm, state.is_homed
            );
        }

        Self {
            driver,
            params,
            store,
            state,
        }
    }

    /// Move to an absolute extension, blocking for the estimated drive time.
    pub fn move_to(&mut self, r_mm: f64) -> Result<AxisStatus, MechError> {
        if !self.state.is_homed {
            warn!("R axis is not homed, the position estimate may have drifted");
        }

        if r_mm < self.params.min_position_mm || r_mm > self.params.max_position_mm {
            return Err(MechError::OutOfRange {
                axis: AxisId::R,
                value: r_mm,
                min: self.params.min_position_mm,
                max: self.params.max_position_mm,
            });
        }

        let distance_mm = r_mm - self.state.current_position_mm;

        if distance_mm != 0.0 {
            let duration_s = distance_mm.abs() / self.params.speed_mm_s;
            let dir = if distance_mm > 0.0 { Dir::Fwd } else { Dir::Rev };

            info!(
                "R axis: {:.1} mm -> {:.1} mm ({:.2} s drive)",
                self.state.current_position_mm, r_mm, duration_s
            );

            self.driver
                .drive_timed(dir, FULL_DUTY_PCT, Duration::from_secs_f64(duration_s))
                .map_err(driver_err)?;

            self.state.current_position_mm = r_mm;
            self.save_state();
        }

        Ok(self.status())
    }

    /// Home by retracting against the hard stop, then zero the estimate.
    pub fn home(&mut self) -> Result<AxisStatus, MechError> {
        info!(
            "R axis homing (retracting for {:.1} s)",
            self.params.home_duration_s
        );

        self.driver
            .drive_timed(
                Dir::Rev,
                FULL_DUTY_PCT,
                Duration::from_secs_f64(self.params.home_duration_s),
            )
            .map_err(driver_err)?;

        self.state.current_position_mm = 0.0;
        self.state.is_homed = true;
        self.save_state();

        info!("R axis homed");
        Ok(self.status())
    }

    /// Raw timed drive for recovery and calibration.
    ///
    /// The estimate is advanced by the commanded time and clamped to the
    /// stroke. The drive may have stalled against either hard stop, so the
    /// homed flag is dropped until the next home.
    pub fn jog(&mut self, dir: Dir, duration_s: f64) -> Result<AxisStatus, MechError> {
        info!(
            "R axis raw {} for {:.1} s",
            match dir {
                Dir::Fwd => "extend",
                Dir::Rev => "retract",
            },
            duration_s
        );

        self.driver
            .drive_timed(dir, FULL_DUTY_PCT, Duration::from_secs_f64(duration_s))
            .map_err(driver_err)?;

        let delta_mm = self.params.speed_mm_s
            * duration_s
            * match dir {
                Dir::Fwd => 1.0,
                Dir::Rev => -1.0,
            };

        self.state.current_position_mm = clamp(
            self.state.current_position_mm + delta_mm,
            self.params.min_position_mm,
            self.params.max_position_mm,
        );
        self.state.is_homed = false;
        self.save_state();

        Ok(self.status())
    }

    /// Read-only position snapshot.
    pub fn status(&self) -> AxisStatus {
        AxisStatus {
            value: self.state.current_position_mm,
            is_homed: self.state.is_homed,
            method: PositionMethod::TimeEstimate,
        }
    }

    fn save_state(&self) {
        if let Err(e) = self.store.save(STATE_NAME, &self.state) {
            warn!("Could not save R axis state: {}", e);
        }
    }
}

fn driver_err(source: DriverError) -> MechError {
    MechError::Driver {
        axis: AxisId::R,
        source,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::driver::sim::{HBridgeRec, SimHBridge};
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn test_params() -> RAxisParams {
        RAxisParams {
            enable_pin: 12,
            in1_pin: 18,
            in2_pin: 15,
            stby_pin: 23,
            pwm_frequency_hz: 1000.0,
            speed_mm_s: 10.0,
            min_position_mm: 0.0,
            max_position_mm: 50.0,
            home_duration_s: 6.0,
        }
    }

    fn test_axis() -> (RAxis, Arc<Mutex<HBridgeRec>>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf()).unwrap();
        let bridge = SimHBridge::new();
        let rec = bridge.rec();
        let axis = RAxis::new(Box::new(bridge), test_params(), store);
        (axis, rec, dir)
    }

    #[test]
    fn test_move_drive_time_from_distance() {
        let (mut axis, rec, _dir) = test_axis();
        axis.home().unwrap();

        // 30 mm at 10 mm/s is a 3 s drive
        axis.move_to(30.0).unwrap();

        let rec = rec.lock().unwrap();
        assert_eq!(rec.timed.last(), Some(&(Dir::Fwd, 100.0, 3.0)));
    }

    #[test]
    fn test_retract_is_reverse() {
        let (mut axis, rec, _dir) = test_axis();
        axis.home().unwrap();

        axis.move_to(30.0).unwrap();
        axis.move_to(10.0).unwrap();

        let rec = rec.lock().unwrap();
        assert_eq!(rec.timed.last(), Some(&(Dir::Rev, 100.0, 2.0)));
    }

    #[test]
    fn test_move_out_of_range_no_motion() {
        let (mut axis, rec, _dir) = test_axis();

        let result = axis.move_to(60.0);

        assert!(matches!(result, Err(MechError::OutOfRange { .. })));
        assert!(rec.lock().unwrap().timed.is_empty());
    }

    #[test]
    fn test_home_retracts_full_stroke_time() {
        let (mut axis, rec, _dir) = test_axis();

        let status = axis.home().unwrap();

        assert_eq!(status.value, 0.0);
        assert!(status.is_homed);
        assert_eq!(
            rec.lock().unwrap().timed.last(),
            Some(&(Dir::Rev, 100.0, 6.0))
        );
    }

    #[test]
    fn test_jog_updates_estimate_and_unhomes() {
        let (mut axis, _rec, _dir) = test_axis();
        axis.home().unwrap();

        let status = axis.jog(Dir::Fwd, 2.0).unwrap();
        assert_eq!(status.value, 20.0);
        assert!(!status.is_homed);

        // A long jog saturates at the stroke limit
        let status = axis.jog(Dir::Fwd, 10.0).unwrap();
        assert_eq!(status.value, 50.0);
    }
}

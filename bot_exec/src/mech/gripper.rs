//! # Gripper controller
//!
//! Servo driven cutting gripper. The blade state is RAM only and starts
//! `Unknown`, there is no sensing on the servo. A cut always opens first so
//! the blades get a full travel, then closes held for the cut time.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// Internal imports
use super::driver::ServoDriver;
use super::params::GripperParams;
use super::MechError;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Blade state of the gripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GripperState {
    Open,
    Closed,
    /// State at process start, before any commanded operation
    Unknown,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The gripper controller.
pub struct Gripper {
    driver: Box<dyn ServoDriver>,
    params: GripperParams,
    state: GripperState,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl fmt::Display for GripperState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GripperState::Open => write!(f, "Open"),
            GripperState::Closed => write!(f, "Closed"),
            GripperState::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Gripper {
    pub fn new(driver: Box<dyn ServoDriver>, params: GripperParams) -> Self {
        Self {
            driver,
            params,
            state: GripperState::Unknown,
        }
    }

    /// Open the blades (release). Blocking for the signal hold time.
    pub fn open(&mut self) -> Result<(), MechError> {
        self.set_angle(
            self.params.open_angle_deg,
            self.params.default_hold_s,
            GripperState::Open,
        )
    }

    /// Close the blades (grip). Blocking for the signal hold time.
    pub fn close(&mut self) -> Result<(), MechError> {
        self.set_angle(
            self.params.closed_angle_deg,
            self.params.default_hold_s,
            GripperState::Closed,
        )
    }

    /// Perform a cutting action: open fully, then close held for
    /// `cut_time_s` so the blades finish the cut under load.
    pub fn cut(&mut self, cut_time_s: f64) -> Result<(), MechError> {
        info!("Cutting (blades held closed for {:.1} s)", cut_time_s);

        self.set_angle(
            self.params.open_angle_deg,
            self.params.cut_open_hold_s,
            GripperState::Open,
        )?;
        self.set_angle(
            self.params.closed_angle_deg,
            cut_time_s,
            GripperState::Closed,
        )
    }

    /// Current blade state.
    pub fn state(&self) -> GripperState {
        self.state
    }

    fn set_angle(
        &mut self,
        angle_deg: f64,
        hold_s: f64,
        new_state: GripperState,
    ) -> Result<(), MechError> {
        self.driver
            .set_angle(angle_deg, Duration::from_secs_f64(hold_s))
            .map_err(MechError::Gripper)?;
        self.state = new_state;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::driver::sim::SimServo;
    use super::*;

    fn test_params() -> GripperParams {
        GripperParams {
            servo_pin: 13,
            pwm_frequency_hz: 50.0,
            open_angle_deg: 90.0,
            closed_angle_deg: 0.0,
            default_hold_s: 0.5,
            cut_open_hold_s: 0.3,
        }
    }

    #[test]
    fn test_open_close_state() {
        let servo = SimServo::new();
        let rec = servo.rec();
        let mut gripper = Gripper::new(Box::new(servo), test_params());

        assert_eq!(gripper.state(), GripperState::Unknown);

        gripper.open().unwrap();
        assert_eq!(gripper.state(), GripperState::Open);

        gripper.close().unwrap();
        assert_eq!(gripper.state(), GripperState::Closed);

        let rec = rec.lock().unwrap();
        assert_eq!(rec.angles, vec![(90.0, 0.5), (0.0, 0.5)]);
    }

    #[test]
    fn test_cut_opens_then_closes_for_cut_time() {
        let servo = SimServo::new();
        let rec = servo.rec();
        let mut gripper = Gripper::new(Box::new(servo), test_params());

        gripper.cut(1.5).unwrap();

        assert_eq!(gripper.state(), GripperState::Closed);
        let rec = rec.lock().unwrap();
        assert_eq!(rec.angles, vec![(90.0, 0.3), (0.0, 1.5)]);
    }

    #[test]
    fn test_failed_command_leaves_state() {
        let servo = SimServo::new();
        let rec = servo.rec();
        rec.lock().unwrap().fail_on = Some(1);
        let mut gripper = Gripper::new(Box::new(servo), test_params());

        assert!(gripper.open().is_err());
        assert_eq!(gripper.state(), GripperState::Unknown);
    }
}

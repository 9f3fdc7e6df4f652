//! # Mechanisms module
//!
//! Controllers for the robot's three motion axes and the cutting gripper:
//!
//! - Z: stepper driven carriage, closed loop on counted steps (0 to 750 mm)
//! - R: linear actuator on the carriage, open loop time estimate (0 to 50 mm)
//! - theta: DC motor turntable under the plant, no feedback
//! - gripper: servo cutting blades
//!
//! A [`Mech`] owns all four exclusively. On the arm target it claims the GPIO
//! pins through `rppal`; everywhere else it runs on the simulated drivers so
//! development machines can exercise the full command set.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod driver;
pub mod gripper;
pub mod params;
pub mod r_axis;
pub mod state_store;
pub mod theta;
pub mod z_axis;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use self::gripper::{Gripper, GripperState};
pub use self::params::MechParams;
pub use self::r_axis::RAxis;
pub use self::state_store::StateStore;
pub use self::theta::Theta;
pub use self::z_axis::ZAxis;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

// Internal imports
use self::driver::sim::{HBridgeRec, ServoRec, SimHBridge, SimServo, SimStepper, StepperRec};
use self::driver::{Dir, DriverError};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Identifies one of the three motion axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisId {
    Z,
    R,
    Theta,
}

/// How an axis's position value is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMethod {
    /// Counted motor steps, reliable unless the motor stalls
    StepCount,

    /// Integrated from commanded drive time, subject to drift
    TimeEstimate,

    /// No feedback at all, the value is definitional
    NoFeedback,
}

/// Errors raised by the mechanisms module.
#[derive(Error, Debug)]
pub enum MechError {
    #[error("{axis} axis target {value} mm is outside the calibrated range [{min}, {max}] mm")]
    OutOfRange {
        axis: AxisId,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{axis} axis driver error: {source}")]
    Driver { axis: AxisId, source: DriverError },

    #[error("Gripper driver error: {0}")]
    Gripper(DriverError),

    #[error("Could not acquire the GPIO peripheral: {0}")]
    GpioInit(DriverError),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Read-only snapshot of one axis.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AxisStatus {
    /// Position value. Units: mm for Z and R, deg for theta
    pub value: f64,

    /// Whether the position is anchored by a completed homing operation
    pub is_homed: bool,

    /// How the value is obtained
    pub method: PositionMethod,
}

/// Snapshot of the whole mechanisms set.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MechStatus {
    pub z: AxisStatus,
    pub r: AxisStatus,
    pub theta: AxisStatus,
    pub gripper: GripperState,
}

/// The full mechanisms set, exclusively owning all four motor drivers.
pub struct Mech {
    pub z: ZAxis,
    pub r: RAxis,
    pub theta: Theta,
    pub gripper: Gripper,

    params: MechParams,
}

/// Recording handles for a simulated mechanisms set, see
/// [`driver::sim`].
pub struct SimHandles {
    pub z: Arc<Mutex<StepperRec>>,
    pub r: Arc<Mutex<HBridgeRec>>,
    pub theta: Arc<Mutex<HBridgeRec>>,
    pub gripper: Arc<Mutex<ServoRec>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AxisId::Z => write!(f, "Z"),
            AxisId::R => write!(f, "R"),
            AxisId::Theta => write!(f, "theta"),
        }
    }
}

impl fmt::Display for PositionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PositionMethod::StepCount => write!(f, "step count"),
            PositionMethod::TimeEstimate => write!(f, "time estimate"),
            PositionMethod::NoFeedback => write!(f, "no feedback"),
        }
    }
}

impl fmt::Display for AxisStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:.1} (homed: {}, {})",
            self.value, self.is_homed, self.method
        )
    }
}

impl Mech {
    /// Build a simulated mechanisms set, returning the recording handles
    /// alongside it.
    pub fn new_sim(params: MechParams, store: StateStore) -> (Self, SimHandles) {
        let z_drv = SimStepper::new();
        let r_drv = SimHBridge::new();
        let theta_drv = SimHBridge::new();
        let gripper_drv = SimServo::new();

        let handles = SimHandles {
            z: z_drv.rec(),
            r: r_drv.rec(),
            theta: theta_drv.rec(),
            gripper: gripper_drv.rec(),
        };

        let mech = Self {
            z: ZAxis::new(Box::new(z_drv), params.z_axis.clone(), store.clone()),
            r: RAxis::new(Box::new(r_drv), params.r_axis.clone(), store),
            theta: Theta::new(Box::new(theta_drv), params.theta_axis.clone()),
            gripper: Gripper::new(Box::new(gripper_drv), params.gripper.clone()),
            params,
        };

        (mech, handles)
    }

    /// Build the mechanisms set on the real GPIO drivers, claiming all pins.
    #[cfg(target_arch = "arm")]
    pub fn new_rpi(params: MechParams, store: StateStore) -> Result<Self, MechError> {
        use self::driver::rpi::{RpiHBridge, RpiServo, RpiStepper};
        use rppal::gpio::Gpio;

        let gpio =
            Gpio::new().map_err(|e| MechError::GpioInit(DriverError::Gpio(e.to_string())))?;

        let zp = &params.z_axis;
        let z_drv = RpiStepper::new(&gpio, zp.enable_pin, zp.step_pin, zp.dir_pin)
            .map_err(|source| MechError::Driver {
                axis: AxisId::Z,
                source,
            })?;

        let rp = &params.r_axis;
        let r_drv = RpiHBridge::new(
            &gpio,
            rp.enable_pin,
            rp.in1_pin,
            rp.in2_pin,
            rp.stby_pin,
            rp.pwm_frequency_hz,
        )
        .map_err(|source| MechError::Driver {
            axis: AxisId::R,
            source,
        })?;

        let tp = &params.theta_axis;
        let theta_drv = RpiHBridge::new(
            &gpio,
            tp.enable_pin,
            tp.in1_pin,
            tp.in2_pin,
            tp.stby_pin,
            tp.pwm_frequency_hz,
        )
        .map_err(|source| MechError::Driver {
            axis: AxisId::Theta,
            source,
        })?;

        let gp = &params.gripper;
        let gripper_drv =
            RpiServo::new(&gpio, gp.servo_pin, gp.pwm_frequency_hz).map_err(MechError::Gripper)?;

        Ok(Self {
            z: ZAxis::new(Box::new(z_drv), params.z_axis.clone(), store.clone()),
            r: RAxis::new(Box::new(r_drv), params.r_axis.clone(), store),
            theta: Theta::new(Box::new(theta_drv), params.theta_axis.clone()),
            gripper: Gripper::new(Box::new(gripper_drv), params.gripper.clone()),
            params,
        })
    }

    /// Home all axes: R retracts first so the arm cannot snag while the
    /// carriage descends, then Z, then the theta reference.
    pub fn home_all(&mut self) -> Result<(), MechError> {
        info!("Homing all axes");

        self.r.home()?;
        pause(self.params.home_pause_s);

        self.z.home()?;
        pause(self.params.home_pause_s);

        self.theta.home()?;

        info!("All axes homed");
        Ok(())
    }

    /// Coordinated move in cylindrical coordinates: height first, then
    /// rotation, then extension.
    pub fn move_to_position(
        &mut self,
        z_mm: Option<f64>,
        r_mm: Option<f64>,
        theta: Option<(Dir, f64)>,
        z_rate_hz: Option<f64>,
    ) -> Result<(), MechError> {
        if let Some(z) = z_mm {
            self.z.move_to(z, z_rate_hz)?;
            pause(self.params.move_pause_s);
        }

        if let Some((dir, duration_s)) = theta {
            self.theta.rotate_timed(dir, None, duration_s)?;
            pause(self.params.move_pause_s);
        }

        if let Some(r) = r_mm {
            self.r.move_to(r)?;
            pause(self.params.move_pause_s);
        }

        Ok(())
    }

    /// Approach a leaf: open the gripper, raise to height, rotate to align,
    /// extend to reach, and optionally cut it.
    pub fn approach(
        &mut self,
        z_mm: f64,
        theta_duration_s: f64,
        r_mm: f64,
        cut: bool,
    ) -> Result<(), MechError> {
        info!(
            "Approaching leaf: Z {:.1} mm, theta {:.1} s rotation, R {:.1} mm",
            z_mm, theta_duration_s, r_mm
        );

        self.gripper.open()?;
        pause(self.params.move_pause_s);

        self.z.move_to(z_mm, Some(self.params.approach_z_rate_hz))?;
        pause(self.params.approach_pause_s);

        self.theta.rotate_timed(Dir::Fwd, None, theta_duration_s)?;
        pause(self.params.approach_pause_s);

        self.r.move_to(r_mm)?;
        pause(self.params.approach_pause_s);

        info!("Leaf reached");

        if cut {
            self.gripper.cut(self.params.approach_cut_time_s)?;
            pause(self.params.approach_pause_s);
            info!("Leaf cut");
        }

        Ok(())
    }

    /// Snapshot of every axis plus the gripper.
    pub fn status(&self) -> MechStatus {
        MechStatus {
            z: self.z.status(),
            r: self.r.status(),
            theta: self.theta.status(),
            gripper: self.gripper.state(),
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
    use super::params::*;
    use super::*;

    pub(crate) fn test_params() -> MechParams {
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

    fn test_mech() -> (Mech, SimHandles, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf()).unwrap();
        let (mech, handles) = Mech::new_sim(test_params(), store);
        (mech, handles, dir)
    }

    #[test]
    fn test_home_all() {
        let (mut mech, handles, _dir) = test_mech();

        mech.home_all().unwrap();

        let status = mech.status();
        assert!(status.z.is_homed);
        assert!(status.r.is_homed);
        assert!(status.theta.is_homed);

        // R homing is the full stroke retract
        assert_eq!(
            handles.r.lock().unwrap().timed.last(),
            Some(&(Dir::Rev, 100.0, 6.0))
        );
    }

    #[test]
    fn test_approach_sequence() {
        let (mut mech, handles, _dir) = test_mech();
        mech.home_all().unwrap();

        mech.approach(200.0, 5.0, 40.0, true).unwrap();

        // Gripper: open, then the cut's open and close strokes
        assert_eq!(
            handles.gripper.lock().unwrap().angles,
            vec![(90.0, 0.5), (90.0, 0.3), (0.0, 1.5)]
        );

        // Z ran at the approach rate. 200 mm * 4.27 steps/mm lands just under
        // 854 in f64 and the cast truncates.
        let z_rec = handles.z.lock().unwrap();
        let (dir, steps, rate) = *z_rec.moves.last().unwrap();
        assert_eq!(dir, Dir::Fwd);
        assert_eq!(steps, 853);
        assert_eq!(rate, 800.0);

        // Alignment rotation then the reach extension
        assert_eq!(
            handles.theta.lock().unwrap().timed.last(),
            Some(&(Dir::Fwd, 100.0, 5.0))
        );
        assert_eq!(
            handles.r.lock().unwrap().timed.last(),
            Some(&(Dir::Fwd, 100.0, 4.0))
        );
    }

    #[test]
    fn test_move_to_position_partial() {
        let (mut mech, handles, _dir) = test_mech();
        mech.home_all().unwrap();

        mech.move_to_position(Some(100.0), None, None, None).unwrap();

        assert_eq!(handles.z.lock().unwrap().moves.len(), 1);
        // No rotation or extension commanded
        assert!(handles.theta.lock().unwrap().timed.is_empty());
        assert_eq!(handles.r.lock().unwrap().timed.len(), 1); // home only
    }

    #[test]
    fn test_status_reports_gripper() {
        let (mut mech, _handles, _dir) = test_mech();

        assert_eq!(mech.status().gripper, GripperState::Unknown);
        mech.gripper.open().unwrap();
        assert_eq!(mech.status().gripper, GripperState::Open);
    }
}

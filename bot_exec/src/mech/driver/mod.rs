//! # Motor driver seam
//!
//! Trait interfaces between the axis controllers and the physical motor
//! electronics. Two implementations exist:
//!
//! - [`sim`]: simulated drivers which complete instantly and record every
//!   command into a shared handle, used on development machines and by tests.
//! - [`rpi`]: Raspberry Pi GPIO drivers built on `rppal`, compiled for the
//!   arm target only.
//!
//! All mechanical blocking happens inside the driver, so the axis controllers
//! above this seam are timing-agnostic.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

#[cfg(target_arch = "arm")]
pub mod rpi;
pub mod sim;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Direction of motor travel.
///
/// `Fwd` drives the axis positive: up for the Z carriage, extend for the
/// linear actuator, clockwise for the turntable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dir {
    Fwd,
    Rev,
}

/// Errors raised by a motor driver.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("Duty cycle {0} % is outside 0 to 100 %")]
    InvalidDuty(f64),

    #[error("Step rate {0} Hz is not positive")]
    InvalidRate(f64),

    #[error("Servo angle {0} deg is outside 0 to 180 deg")]
    InvalidAngle(f64),

    #[error("Simulated driver fault injected on call {0}")]
    SimFault(u32),

    #[error("A simulated driver record lock was poisoned")]
    LockPoisoned,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Driver for a stepper motor channel (enable, step, direction pins).
pub trait StepperDriver: Send {
    /// Energise or release the motor coils.
    fn set_enabled(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Issue `steps` pulses in `dir` at `rate_hz`, blocking until complete.
    fn step_block(&mut self, dir: Dir, steps: u32, rate_hz: f64) -> Result<(), DriverError>;
}

/// Driver for a DC motor behind an H-bridge (enable, in1, in2, standby pins).
pub trait HBridgeDriver: Send {
    /// Start driving in `dir` at `duty_pct` percent duty. Non-blocking.
    fn drive(&mut self, dir: Dir, duty_pct: f64) -> Result<(), DriverError>;

    /// Stop driving. Idempotent.
    fn stop(&mut self) -> Result<(), DriverError>;

    /// Drive in `dir` at `duty_pct` for `duration`, then stop. Blocking.
    fn drive_timed(
        &mut self,
        dir: Dir,
        duty_pct: f64,
        duration: Duration,
    ) -> Result<(), DriverError> {
        self.drive(dir, duty_pct)?;
        std::thread::sleep(duration);
        self.stop()
    }
}

/// Driver for a hobby servo channel.
pub trait ServoDriver: Send {
    /// Command `angle_deg`, hold the control signal for `hold`, then release
    /// it. Blocking for the hold time.
    fn set_angle(&mut self, angle_deg: f64, hold: Duration) -> Result<(), DriverError>;
}

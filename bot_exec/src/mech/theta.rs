//! # Theta axis controller
//!
//! DC motor turntable rotating the plant base. There is no angle feedback at
//! all, so rotations are commanded by duty cycle and time only and the angle
//! reading is definitional: homing declares the current orientation to be
//! zero. Nothing on this axis is persisted.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::info;
use std::time::Duration;

// Internal imports
use super::driver::{Dir, DriverError, HBridgeDriver};
use super::params::ThetaParams;
use super::{AxisId, AxisStatus, MechError, PositionMethod};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The theta axis controller.
pub struct Theta {
    driver: Box<dyn HBridgeDriver>,
    params: ThetaParams,
    angle_deg: f64,
    is_homed: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Theta {
    pub fn new(driver: Box<dyn HBridgeDriver>, params: ThetaParams) -> Self {
        Self {
            driver,
            params,
            angle_deg: 0.0,
            is_homed: false,
        }
    }

    /// Start continuous rotation. Non-blocking, pair with [`Theta::stop`].
    pub fn start_continuous(&mut self, dir: Dir, duty_pct: f64) -> Result<(), MechError> {
        info!(
            "Theta rotation started ({}, {:.0} % duty)",
            dir_name(dir),
            duty_pct
        );
        self.driver.drive(dir, duty_pct).map_err(driver_err)
    }

    /// Stop any rotation. Idempotent.
    pub fn stop(&mut self) -> Result<(), MechError> {
        self.driver.stop().map_err(driver_err)
    }

    /// Rotate for a fixed duration, blocking, then stop.
    pub fn rotate_timed(
        &mut self,
        dir: Dir,
        duty_pct: Option<f64>,
        duration_s: f64,
    ) -> Result<(), MechError> {
        let duty_pct = duty_pct.unwrap_or(self.params.default_duty_pct);

        info!(
            "Rotating {} for {:.1} s at {:.0} % duty",
            dir_name(dir),
            duration_s,
            duty_pct
        );

        self.driver
            .drive_timed(dir, duty_pct, Duration::from_secs_f64(duration_s))
            .map_err(driver_err)
    }

    /// Home is definitional for this axis: declare the current orientation
    /// to be zero degrees. No motion.
    pub fn home(&mut self) -> Result<AxisStatus, MechError> {
        self.angle_deg = 0.0;
        self.is_homed = true;
        info!("Theta axis homed (reference zeroed)");
        Ok(self.status())
    }

    /// Read-only position snapshot.
    pub fn status(&self) -> AxisStatus {
        AxisStatus {
            value: self.angle_deg,
            is_homed: self.is_homed,
            method: PositionMethod::NoFeedback,
        }
    }
}

fn driver_err(source: DriverError) -> MechError {
    MechError::Driver {
        axis: AxisId::Theta,
        source,
    }
}

fn dir_name(dir: Dir) -> &'static str {
    match dir {
        Dir::Fwd => "clockwise",
        Dir::Rev => "counter-clockwise",
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

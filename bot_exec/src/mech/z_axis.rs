//! # Z axis controller
//!
//! Belt-driven carriage on a stepper motor. Position is tracked by counting
//! commanded steps, which holds as long as the motor never stalls, and is
//! persisted after every committed move. Homing drives the counted position
//! back to zero at a reduced rate and re-anchors the count.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{info, warn};

// Internal imports
use super::driver::{Dir, DriverError, StepperDriver};
use super::params::ZAxisParams;
use super::state_store::{StateStore, ZAxisState};
use super::{AxisId, AxisStatus, MechError, PositionMethod};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of this axis's document in the state store.
const STATE_NAME: &str = "z_axis";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The Z axis controller.
pub struct ZAxis {
    driver: Box<dyn StepperDriver>,
    params: ZAxisParams,
    store: StateStore,
    state: ZAxisState,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ZAxis {
    /// Create the controller, recovering the last persisted position.
    pub fn new(driver: Box<dyn StepperDriver>, params: ZAxisParams, store: StateStore) -> Self {
        let state: ZAxisState = store.load(STATE_NAME);

        if state.current_step != 0 || state.is_homed {
            info!(
                "Loaded Z axis state: {} steps ({:.1} mm), homed: {}",
                state.current_step,
                state.current_step as f64 / params.steps_per_mm,
                state.is_homed
            );
        }

        Self {
            driver,
            params,
            store,
            state,
        }
    }

    /// Move to an absolute height, blocking until the move completes.
    ///
    /// The step delta is truncated toward zero, so sub-step residuals are
    /// dropped rather than rounded.
    pub fn move_to(&mut self, z_mm: f64, rate_hz: Option<f64>) -> Result<AxisStatus, MechError> {
        if !self.state.is_homed {
            warn!("Z axis is not homed, position confidence is reduced");
        }

        if z_mm < self.params.min_position_mm || z_mm > self.params.max_position_mm {
            return Err(MechError::OutOfRange {
                axis: AxisId::Z,
                value: z_mm,
                min: self.params.min_position_mm,
                max: self.params.max_position_mm,
            });
        }

        let rate_hz = rate_hz.unwrap_or(self.params.default_rate_hz);
        let current_mm = self.position_mm();
        let delta_steps = ((z_mm - current_mm) * self.params.steps_per_mm) as i64;

        if delta_steps != 0 {
            info!(
                "Z axis: {:.1} mm -> {:.1} mm ({} steps at {:.0} Hz)",
                current_mm, z_mm, delta_steps, rate_hz
            );

            let (dir, steps) = if delta_steps > 0 {
                (Dir::Fwd, delta_steps as u32)
            } else {
                (Dir::Rev, (-delta_steps) as u32)
            };

            self.driver.set_enabled(true).map_err(driver_err)?;
            self.driver.step_block(dir, steps, rate_hz).map_err(driver_err)?;

            self.state.current_step += delta_steps;
            self.save_state();
        }

        Ok(self.status())
    }

    /// Home by driving the counted position back to zero, then re-anchor the
    /// count there.
    pub fn home(&mut self) -> Result<AxisStatus, MechError> {
        info!(
            "Z axis homing ({} steps, {:.1} mm)",
            self.state.current_step,
            self.position_mm()
        );

        let steps_to_home = self.state.current_step;

        if steps_to_home != 0 {
            let (dir, steps) = if steps_to_home > 0 {
                (Dir::Rev, steps_to_home as u32)
            } else {
                (Dir::Fwd, (-steps_to_home) as u32)
            };

            self.driver.set_enabled(true).map_err(driver_err)?;
            self.driver
                .step_block(dir, steps, self.params.homing_rate_hz)
                .map_err(driver_err)?;
        } else {
            info!("Z axis already at home");
        }

        self.state.current_step = 0;
        self.state.is_homed = true;
        self.save_state();

        info!("Z axis homed");
        Ok(self.status())
    }

    /// Current height. Units: mm
    pub fn position_mm(&self) -> f64 {
        self.state.current_step as f64 / self.params.steps_per_mm
    }

    /// Read-only position snapshot.
    pub fn status(&self) -> AxisStatus {
        AxisStatus {
            value: self.position_mm(),
            is_homed: self.state.is_homed,
            method: PositionMethod::StepCount,
        }
    }

    fn save_state(&self) {
        if let Err(e) = self.store.save(STATE_NAME, &self.state) {
            warn!("Could not save Z axis state: {}", e);
        }
    }
}

fn driver_err(source: DriverError) -> MechError {
    MechError::Driver {
        axis: AxisId::Z,
        source,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

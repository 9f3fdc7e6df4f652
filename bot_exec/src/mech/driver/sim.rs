//! # Simulated motor drivers
//!
//! Drivers which complete instantly and record every command into a shared
//! [`Arc<Mutex>`] handle. They stand in for the GPIO drivers on non-arm
//! builds and give tests a way to assert on commanded motion and to inject
//! faults at a chosen call.
//!
//! Fault injection: setting `fail_on = Some(n)` in a record makes the `n`th
//! motion command on that driver fail with [`DriverError::SimFault`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// Internal imports
use super::{Dir, DriverError, HBridgeDriver, ServoDriver, StepperDriver};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Record of commands issued to a [`SimStepper`].
#[derive(Debug, Clone, Default)]
pub struct StepperRec {
    /// Whether the coils are currently energised
    pub enabled: bool,

    /// Every completed step command as `(dir, steps, rate_hz)`
    pub moves: Vec<(Dir, u32, f64)>,

    /// Number of motion commands received so far
    pub calls: u32,

    /// Fail the nth motion command
    pub fail_on: Option<u32>,
}

/// Record of commands issued to a [`SimHBridge`].
#[derive(Debug, Clone, Default)]
pub struct HBridgeRec {
    /// Current continuous drive, `None` when stopped
    pub running: Option<(Dir, f64)>,

    /// Every continuous drive start as `(dir, duty_pct)`
    pub drives: Vec<(Dir, f64)>,

    /// Every timed drive as `(dir, duty_pct, duration_s)`
    pub timed: Vec<(Dir, f64, f64)>,

    /// Number of stop commands received
    pub stops: u32,

    /// Number of motion commands received so far
    pub calls: u32,

    /// Fail the nth motion command
    pub fail_on: Option<u32>,
}

/// Record of commands issued to a [`SimServo`].
#[derive(Debug, Clone, Default)]
pub struct ServoRec {
    /// Every angle command as `(angle_deg, hold_s)`
    pub angles: Vec<(f64, f64)>,

    /// Number of motion commands received so far
    pub calls: u32,

    /// Fail the nth motion command
    pub fail_on: Option<u32>,
}

/// Simulated stepper motor driver.
pub struct SimStepper {
    rec: Arc<Mutex<StepperRec>>,
}

/// Simulated H-bridge DC motor driver.
pub struct SimHBridge {
    rec: Arc<Mutex<HBridgeRec>>,
}

/// Simulated servo driver.
pub struct SimServo {
    rec: Arc<Mutex<ServoRec>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimStepper {
    pub fn new() -> Self {
        Self {
            rec: Arc::default(),
        }
    }

    /// Shared handle onto the command record.
    pub fn rec(&self) -> Arc<Mutex<StepperRec>> {
        self.rec.clone()
    }
}

impl Default for SimStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl StepperDriver for SimStepper {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), DriverError> {
        let mut rec = lock(&self.rec)?;
        rec.enabled = enabled;
        Ok(())
    }

    fn step_block(&mut self, dir: Dir, steps: u32, rate_hz: f64) -> Result<(), DriverError> {
        if rate_hz <= 0.0 {
            return Err(DriverError::InvalidRate(rate_hz));
        }

        let mut rec = lock(&self.rec)?;
        let fail_on = rec.fail_on;
        check_fault(&mut rec.calls, fail_on)?;
        rec.moves.push((dir, steps, rate_hz));
        Ok(())
    }
}

impl SimHBridge {
    pub fn new() -> Self {
        Self {
            rec: Arc::default(),
        }
    }

    /// Shared handle onto the command record.
    pub fn rec(&self) -> Arc<Mutex<HBridgeRec>> {
        self.rec.clone()
    }
}

impl Default for SimHBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HBridgeDriver for SimHBridge {
    fn drive(&mut self, dir: Dir, duty_pct: f64) -> Result<(), DriverError> {
        if !(0.0..=100.0).contains(&duty_pct) {
            return Err(DriverError::InvalidDuty(duty_pct));
        }

        let mut rec = lock(&self.rec)?;
        let fail_on = rec.fail_on;
        check_fault(&mut rec.calls, fail_on)?;
        rec.running = Some((dir, duty_pct));
        rec.drives.push((dir, duty_pct));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        let mut rec = lock(&self.rec)?;
        rec.running = None;
        rec.stops += 1;
        Ok(())
    }

    /// Timed drives are recorded without sleeping so that tests run at full
    /// speed.
    fn drive_timed(
        &mut self,
        dir: Dir,
        duty_pct: f64,
        duration: Duration,
    ) -> Result<(), DriverError> {
        if !(0.0..=100.0).contains(&duty_pct) {
            return Err(DriverError::InvalidDuty(duty_pct));
        }

        let mut rec = lock(&self.rec)?;
        let fail_on = rec.fail_on;
        check_fault(&mut rec.calls, fail_on)?;
        rec.timed.push((dir, duty_pct, duration.as_secs_f64()));
        rec.running = None;
        Ok(())
    }
}

impl SimServo {
    pub fn new() -> Self {
        Self {
            rec: Arc::default(),
        }
    }

    /// Shared handle onto the command record.
    pub fn rec(&self) -> Arc<Mutex<ServoRec>> {
        self.rec.clone()
    }
}

impl Default for SimServo {
    fn default() -> Self {
        Self::new()
    }
}

impl ServoDriver for SimServo {
    fn set_angle(&mut self, angle_deg: f64, hold: Duration) -> Result<(), DriverError> {
        if !(0.0..=180.0).contains(&angle_deg) {
            return Err(DriverError::InvalidAngle(angle_deg));
        }

        let mut rec = lock(&self.rec)?;
        let fail_on = rec.fail_on;
        check_fault(&mut rec.calls, fail_on)?;
        rec.angles.push((angle_deg, hold.as_secs_f64()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn lock<T>(rec: &Arc<Mutex<T>>) -> Result<MutexGuard<T>, DriverError> {
    rec.lock().map_err(|_| DriverError::LockPoisoned)
}

fn check_fault(calls: &mut u32, fail_on: Option<u32>) -> Result<(), DriverError> {
    *calls += 1;
    match fail_on {
        Some(n) if n == *calls => Err(DriverError::SimFault(n)),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stepper_records_moves() {
        let mut stepper = SimStepper::new();
        let rec = stepper.rec();

        stepper.set_enabled(true).unwrap();
        stepper.step_block(Dir::Fwd, 427, 1000.0).unwrap();
        stepper.step_block(Dir::Rev, 100, 800.0).unwrap();

        let rec = rec.lock().unwrap();
        assert!(rec.enabled);
        assert_eq!(
            rec.moves,
            vec![(Dir::Fwd, 427, 1000.0), (Dir::Rev, 100, 800.0)]
        );
    }

    #[test]
    fn test_hbridge_fault_injection() {
        let mut bridge = SimHBridge::new();
        let rec = bridge.rec();
        rec.lock().unwrap().fail_on = Some(2);

        assert!(bridge.drive(Dir::Fwd, 3.0).is_ok());
        assert!(matches!(
            bridge.drive(Dir::Fwd, 3.0),
            Err(DriverError::SimFault(2))
        ));
        assert!(bridge.drive(Dir::Fwd, 3.0).is_ok());
    }

    #[test]
    fn test_hbridge_stop_idempotent() {
        let mut bridge = SimHBridge::new();
        let rec = bridge.rec();

        bridge.drive(Dir::Rev, 50.0).unwrap();
        bridge.stop().unwrap();
        bridge.stop().unwrap();

        let rec = rec.lock().unwrap();
        assert!(rec.running.is_none());
        assert_eq!(rec.stops, 2);
    }

    #[test]
    fn test_servo_rejects_bad_angle() {
        let mut servo = SimServo::new();
        assert!(matches!(
            servo.set_angle(181.0, Duration::from_secs(0)),
            Err(DriverError::InvalidAngle(_))
        ));
    }
}

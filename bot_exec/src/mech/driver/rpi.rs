//! # Raspberry Pi GPIO motor drivers
//!
//! `rppal` backed implementations of the driver traits. Step pulses are
//! bit-banged on the step pin, while the DC motor duty and the 50 Hz servo
//! signal use `rppal`'s software PWM. Pin numbers are BCM.
//!
//! Each driver releases its motor on drop so a panic or early exit cannot
//! leave an axis driving.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use rppal::gpio::{Gpio, OutputPin};
use std::thread;
use std::time::Duration;

// Internal imports
use super::{Dir, DriverError, HBridgeDriver, ServoDriver, StepperDriver};
use util::maths::lin_map;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Stepper motor driver (enable, step, direction pins).
///
/// The enable pin is active low.
pub struct RpiStepper {
    enable: OutputPin,
    step: OutputPin,
    dir: OutputPin,
}

/// DC motor driver behind a TB6612 style H-bridge.
pub struct RpiHBridge {
    enable: OutputPin,
    in1: OutputPin,
    in2: OutputPin,
    stby: OutputPin,
    pwm_frequency_hz: f64,
}

/// Hobby servo driver on a single PWM pin.
pub struct RpiServo {
    pin: OutputPin,
    pwm_frequency_hz: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RpiStepper {
    pub fn new(
        gpio: &Gpio,
        enable_pin: u8,
        step_pin: u8,
        dir_pin: u8,
    ) -> Result<Self, DriverError> {
        let mut enable = output_pin(gpio, enable_pin)?;
        let mut step = output_pin(gpio, step_pin)?;
        let mut dir = output_pin(gpio, dir_pin)?;

        // Enable is active low, start with the coils released
        enable.set_high();
        step.set_low();
        dir.set_low();

        Ok(Self { enable, step, dir })
    }
}

impl StepperDriver for RpiStepper {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), DriverError> {
        if enabled {
            self.enable.set_low();
        } else {
            self.enable.set_high();
        }
        Ok(())
    }

    fn step_block(&mut self, dir: Dir, steps: u32, rate_hz: f64) -> Result<(), DriverError> {
        if rate_hz <= 0.0 {
            return Err(DriverError::InvalidRate(rate_hz));
        }

        match dir {
            Dir::Fwd => self.dir.set_high(),
            Dir::Rev => self.dir.set_low(),
        }

        let half_period = Duration::from_secs_f64(1.0 / (2.0 * rate_hz));

        for _ in 0..steps {
            self.step.set_high();
            thread::sleep(half_period);
            self.step.set_low();
            thread::sleep(half_period);
        }

        Ok(())
    }
}

impl Drop for RpiStepper {
    fn drop(&mut self) {
        self.enable.set_high();
    }
}

impl RpiHBridge {
    pub fn new(
        gpio: &Gpio,
        enable_pin: u8,
        in1_pin: u8,
        in2_pin: u8,
        stby_pin: u8,
        pwm_frequency_hz: f64,
    ) -> Result<Self, DriverError> {
        let enable = output_pin(gpio, enable_pin)?;
        let mut in1 = output_pin(gpio, in1_pin)?;
        let mut in2 = output_pin(gpio, in2_pin)?;
        let mut stby = output_pin(gpio, stby_pin)?;

        in1.set_low();
        in2.set_low();

        // Take the bridge out of standby
        stby.set_high();

        Ok(Self {
            enable,
            in1,
            in2,
            stby,
            pwm_frequency_hz,
        })
    }
}

impl HBridgeDriver for RpiHBridge {
    fn drive(&mut self, dir: Dir, duty_pct: f64) -> Result<(), DriverError> {
        if !(0.0..=100.0).contains(&duty_pct) {
            return Err(DriverError::InvalidDuty(duty_pct));
        }

        match dir {
            Dir::Fwd => {
                self.in1.set_high();
                self.in2.set_low();
            }
            Dir::Rev => {
                self.in1.set_low();
                self.in2.set_high();
            }
        }

        self.enable
            .set_pwm_frequency(self.pwm_frequency_hz, duty_pct / 100.0)
            .map_err(gpio_err)
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.enable.clear_pwm().map_err(gpio_err)?;
        self.enable.set_low();
        self.in1.set_low();
        self.in2.set_low();
        Ok(())
    }
}

impl Drop for RpiHBridge {
    fn drop(&mut self) {
        let _ = self.stop();
        self.stby.set_low();
    }
}

impl RpiServo {
    pub fn new(gpio: &Gpio, servo_pin: u8, pwm_frequency_hz: f64) -> Result<Self, DriverError> {
        let mut pin = output_pin(gpio, servo_pin)?;
        pin.set_low();

        Ok(Self {
            pin,
            pwm_frequency_hz,
        })
    }
}

impl ServoDriver for RpiServo {
    fn set_angle(&mut self, angle_deg: f64, hold: Duration) -> Result<(), DriverError> {
        if !(0.0..=180.0).contains(&angle_deg) {
            return Err(DriverError::InvalidAngle(angle_deg));
        }

        // 0 to 180 deg maps to a 2.5 to 12.5 % duty cycle
        let duty_pct = lin_map((0.0, 180.0), (2.5, 12.5), angle_deg);

        self.pin
            .set_pwm_frequency(self.pwm_frequency_hz, duty_pct / 100.0)
            .map_err(gpio_err)?;

        thread::sleep(hold);

        // Release the signal so the servo doesn't jitter while holding
        self.pin.clear_pwm().map_err(gpio_err)?;
        self.pin.set_low();

        Ok(())
    }
}

impl Drop for RpiServo {
    fn drop(&mut self) {
        let _ = self.pin.clear_pwm();
        self.pin.set_low();
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn output_pin(gpio: &Gpio, pin: u8) -> Result<OutputPin, DriverError> {
    Ok(gpio.get(pin).map_err(gpio_err)?.into_output())
}

fn gpio_err(error: rppal::gpio::Error) -> DriverError {
    DriverError::Gpio(error.to_string())
}

//! # Mechanisms parameters
//!
//! Calibration and pin assignment for all four mechanisms, loaded from
//! `mech.toml`. Pin numbers are BCM and only used on the arm target.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the mechanisms module.
#[derive(Debug, Clone, Deserialize)]
pub struct MechParams {
    pub z_axis: ZAxisParams,
    pub r_axis: RAxisParams,
    pub theta_axis: ThetaParams,
    pub gripper: GripperParams,

    /// Pause between axes while homing all axes. Units: s
    pub home_pause_s: f64,

    /// Pause between axis moves in a coordinated move. Units: s
    pub move_pause_s: f64,

    /// Pause between steps of the approach sequence. Units: s
    pub approach_pause_s: f64,

    /// Z step rate used during an approach. Units: Hz
    pub approach_z_rate_hz: f64,

    /// Blade hold time for an approach cut. Units: s
    pub approach_cut_time_s: f64,
}

/// Z axis (stepper driven carriage) parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ZAxisParams {
    /// Coil enable pin, active low
    pub enable_pin: u8,

    /// Step pulse pin
    pub step_pin: u8,

    /// Direction pin, high is up
    pub dir_pin: u8,

    /// Calibration from steps to travel. Units: steps/mm
    pub steps_per_mm: f64,

    /// Lower travel limit. Units: mm
    pub min_position_mm: f64,

    /// Upper travel limit. Units: mm
    pub max_position_mm: f64,

    /// Default step rate for moves. Units: Hz
    pub default_rate_hz: f64,

    /// Step rate used while homing. Units: Hz
    pub homing_rate_hz: f64,
}

/// R axis (linear actuator on the carriage) parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RAxisParams {
    /// H-bridge enable pin
    pub enable_pin: u8,

    /// H-bridge input 1, high with in2 low extends
    pub in1_pin: u8,

    /// H-bridge input 2
    pub in2_pin: u8,

    /// H-bridge standby pin, active low
    pub stby_pin: u8,

    /// PWM frequency on the enable pin. Units: Hz
    pub pwm_frequency_hz: f64,

    /// Nominal actuator speed, used to convert drive time to travel.
    /// Units: mm/s
    pub speed_mm_s: f64,

    /// Fully retracted position. Units: mm
    pub min_position_mm: f64,

    /// Full stroke position. Units: mm
    pub max_position_mm: f64,

    /// Retract time guaranteed to reach the hard stop from anywhere in the
    /// stroke. Units: s
    pub home_duration_s: f64,
}

/// Theta axis (DC motor turntable) parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ThetaParams {
    /// H-bridge enable pin, PWM driven for speed control
    pub enable_pin: u8,

    /// H-bridge input 1, high with in2 low is clockwise
    pub in1_pin: u8,

    /// H-bridge input 2
    pub in2_pin: u8,

    /// H-bridge standby pin, active low
    pub stby_pin: u8,

    /// PWM frequency on the enable pin. Units: Hz
    pub pwm_frequency_hz: f64,

    /// Duty cycle for timed rotations when none is given. Units: %
    pub default_duty_pct: f64,
}

/// Gripper (servo) parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct GripperParams {
    /// Servo signal pin
    pub servo_pin: u8,

    /// Servo PWM frequency. Units: Hz
    pub pwm_frequency_hz: f64,

    /// Blade angle when fully open. Units: deg
    pub open_angle_deg: f64,

    /// Blade angle when fully closed. Units: deg
    pub closed_angle_deg: f64,

    /// Signal hold time for plain open and close operations. Units: s
    pub default_hold_s: f64,

    /// Hold time for the opening stroke of a cut. Units: s
    pub cut_open_hold_s: f64,
}

//! # Robot command definitions
//!
//! Commands accepted by the `bot_exec` executable. Each variant derives both
//! [`StructOpt`] for the CLI and serde so an external layer (for example a web
//! UI) can submit the same commands as JSON.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Top level command set for the robot.
#[derive(Debug, Clone, Serialize, Deserialize, StructOpt)]
#[structopt(name = "bot_exec", about = "Herbot plant management robot control")]
pub enum BotCmd {
    /// Home all axes (R retract, Z to bottom, theta reference zeroed)
    #[structopt(name = "home")]
    Home,

    /// Move to an absolute position in cylindrical coordinates
    #[structopt(name = "move")]
    Move {
        /// Target carriage height. Units: mm
        #[structopt(long)]
        z: Option<f64>,

        /// Target radial extension. Units: mm
        #[structopt(long)]
        r: Option<f64>,

        /// Rotation duration, the turntable has no angle feedback. Units: s
        #[structopt(long)]
        theta: Option<f64>,

        /// Rotate counter-clockwise rather than clockwise
        #[structopt(long)]
        theta_ccw: bool,

        /// Step rate for the Z move. Units: Hz
        #[structopt(long, default_value = "1000")]
        z_speed: f64,
    },

    /// Rotate the turntable for a fixed duration
    #[structopt(name = "rotate")]
    Rotate {
        /// Rotation duration. Units: s
        #[structopt(long)]
        duration: f64,

        /// Drive duty cycle, 0 to 100. Units: %
        #[structopt(long, default_value = "100")]
        speed: f64,

        /// Rotate counter-clockwise rather than clockwise
        #[structopt(long)]
        ccw: bool,
    },

    /// Operate the gripper
    #[structopt(name = "gripper")]
    Gripper {
        #[structopt(subcommand)]
        action: GripperAction,
    },

    /// Drive the linear actuator open loop, for recovery and calibration
    #[structopt(name = "actuator")]
    Actuator {
        #[structopt(subcommand)]
        action: ActuatorAction,
    },

    /// Approach a leaf at the given position, optionally cutting it
    #[structopt(name = "approach")]
    Approach {
        /// Leaf height. Units: mm
        #[structopt(long)]
        z: f64,

        /// Rotation duration to align with the leaf. Units: s
        #[structopt(long)]
        theta: f64,

        /// Radial extension to reach the leaf. Units: mm
        #[structopt(long)]
        r: f64,

        /// Cut the leaf after reaching it
        #[structopt(long)]
        cut: bool,
    },

    /// Rotate the plant slowly for an external camera scan, no Z sweep
    #[structopt(name = "scan")]
    Scan {
        /// Scan duration. Units: s
        #[structopt(long, default_value = "60")]
        duration: f64,

        /// Rotation duty cycle, 0 to 100. Units: %
        #[structopt(long, default_value = "3")]
        speed: f64,

        /// Rotate counter-clockwise rather than clockwise
        #[structopt(long)]
        ccw: bool,
    },

    /// Full plant scan with disease detection and leaf removal
    #[structopt(name = "manage")]
    Manage {
        /// Scan time budget. Units: s
        #[structopt(long, default_value = "60")]
        duration: f64,

        /// Z sweep step size. Units: mm
        #[structopt(long, default_value = "100")]
        z_step: f64,

        /// Disease detection confidence threshold, 0 to 1
        #[structopt(long, default_value = "0.6")]
        threshold: f64,
    },

    /// Re-run the disease verdict over recently captured frames
    #[structopt(name = "analyze")]
    Analyze {
        /// Number of recent captures to evaluate
        #[structopt(long, default_value = "10")]
        count: usize,
    },

    /// Show the current position and homed flag of each axis
    #[structopt(name = "status")]
    Status,
}

/// Gripper actions.
#[derive(Debug, Clone, Serialize, Deserialize, StructOpt)]
pub enum GripperAction {
    /// Open the gripper (release)
    #[structopt(name = "open")]
    Open,

    /// Close the gripper (grip)
    #[structopt(name = "close")]
    Close,

    /// Perform a cut, opening first then closing for the hold time
    #[structopt(name = "cut")]
    Cut {
        /// Time to hold the blades closed. Units: s
        #[structopt(long, default_value = "1.0")]
        duration: f64,
    },
}

/// Raw linear actuator actions.
#[derive(Debug, Clone, Serialize, Deserialize, StructOpt)]
pub enum ActuatorAction {
    /// Extend for the given duration
    #[structopt(name = "extend")]
    Extend {
        /// Drive duration. Units: s
        #[structopt(long, default_value = "3.0")]
        duration: f64,
    },

    /// Retract for the given duration
    #[structopt(name = "retract")]
    Retract {
        /// Drive duration. Units: s
        #[structopt(long, default_value = "3.0")]
        duration: f64,
    },
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_manage() {
        let cmd = BotCmd::from_iter(&["bot_exec", "manage", "--duration", "30", "--z-step", "50"]);

        match cmd {
            BotCmd::Manage {
                duration,
                z_step,
                threshold,
            } => {
                assert!((duration - 30.0).abs() < f64::EPSILON);
                assert!((z_step - 50.0).abs() < f64::EPSILON);
                assert!((threshold - 0.6).abs() < f64::EPSILON);
            }
            c => panic!("Parsed to the wrong command: {:?}", c),
        }
    }

    #[test]
    fn test_parse_gripper_cut() {
        let cmd = BotCmd::from_iter(&["bot_exec", "gripper", "cut", "--duration", "2.0"]);

        match cmd {
            BotCmd::Gripper {
                action: GripperAction::Cut { duration },
            } => assert!((duration - 2.0).abs() < f64::EPSILON),
            c => panic!("Parsed to the wrong command: {:?}", c),
        }
    }

    #[test]
    fn test_parse_move_defaults() {
        let cmd = BotCmd::from_iter(&["bot_exec", "move", "--z", "200"]);

        match cmd {
            BotCmd::Move {
                z,
                r,
                theta,
                theta_ccw,
                z_speed,
            } => {
                assert_eq!(z, Some(200.0));
                assert_eq!(r, None);
                assert_eq!(theta, None);
                assert!(!theta_ccw);
                assert!((z_speed - 1000.0).abs() < f64::EPSILON);
            }
            c => panic!("Parsed to the wrong command: {:?}", c),
        }
    }
}

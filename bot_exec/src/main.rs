//! Main robot executable entry point.
//!
//! # Architecture
//!
//! One invocation executes a single command:
//!
//!     - Initialise the session and logging
//!     - Load parameters
//!     - Build the mechanisms set (GPIO drivers on the robot, simulated
//!       drivers anywhere else)
//!     - Execute the command
//!     - Exit the session, flushing saved data
//!
//! The scan commands (`scan`, `manage`) install a Ctrl-C handler which
//! cancels the scan through the manager's return-home path rather than
//! killing the process mid-motion.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use structopt::StructOpt;

// Internal
use bot_lib::mech::driver::Dir;
use bot_lib::mech::{Mech, MechParams, StateStore};
use bot_lib::percep::{Percep, PercepParams};
use bot_lib::scan_mgr::{CancelHandle, ScanCfg, ScanMgr, ScanMgrParams};
use bot_lib::tc::{ActuatorAction, BotCmd, GripperAction};
use util::logger::{logger_init, LevelFilter};
use util::session::Session;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Parse the command first so a bad invocation fails before a session
    // directory is created
    let cmd = BotCmd::from_args();

    // Initialise session
    let session = Session::new("bot_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution
    info!("Herbot Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mech_params: MechParams =
        util::params::load("mech.toml").wrap_err("Could not load mech params")?;
    let percep_params: PercepParams =
        util::params::load("percep.toml").wrap_err("Could not load percep params")?;
    let scan_mgr_params: ScanMgrParams =
        util::params::load("scan_mgr.toml").wrap_err("Could not load scan_mgr params")?;

    info!("Parameters loaded");

    // ---- INITIALISE MECHANISMS ----

    let store = StateStore::from_sw_root().wrap_err("Could not open the axis state store")?;
    let mut mech = init_mech(mech_params, store)?;

    info!("Mechanisms initialised\n");

    // ---- EXECUTE COMMAND ----

    match cmd {
        BotCmd::Home => {
            mech.home_all().wrap_err("Homing failed")?;
        }

        BotCmd::Move {
            z,
            r,
            theta,
            theta_ccw,
            z_speed,
        } => {
            let theta =
                theta.map(|duration_s| (if theta_ccw { Dir::Rev } else { Dir::Fwd }, duration_s));

            mech.move_to_position(z, r, theta, Some(z_speed))
                .wrap_err("Move failed")?;
        }

        BotCmd::Rotate {
            duration,
            speed,
            ccw,
        } => {
            let dir = if ccw { Dir::Rev } else { Dir::Fwd };

            mech.theta
                .rotate_timed(dir, Some(speed), duration)
                .wrap_err("Rotation failed")?;
        }

        BotCmd::Gripper { action } => match action {
            GripperAction::Open => mech.gripper.open().wrap_err("Could not open the gripper")?,
            GripperAction::Close => mech.gripper.close().wrap_err("Could not close the gripper")?,
            GripperAction::Cut { duration } => mech.gripper.cut(duration).wrap_err("Cut failed")?,
        },

        BotCmd::Actuator { action } => match action {
            ActuatorAction::Extend { duration } => {
                mech.r.jog(Dir::Fwd, duration).wrap_err("Extend failed")?;
            }
            ActuatorAction::Retract { duration } => {
                mech.r.jog(Dir::Rev, duration).wrap_err("Retract failed")?;
            }
        },

        BotCmd::Approach { z, theta, r, cut } => {
            mech.approach(z, theta, r, cut).wrap_err("Approach failed")?;
        }

        BotCmd::Scan {
            duration,
            speed,
            ccw,
        } => {
            let mut cfg = ScanCfg::observe(&scan_mgr_params);
            cfg.duration_s = duration;
            cfg.theta_duty_pct = speed;
            cfg.theta_dir = if ccw { Dir::Rev } else { Dir::Fwd };

            run_scan(mech, percep_params, scan_mgr_params, &session, cfg)?;
        }

        BotCmd::Manage {
            duration,
            z_step,
            threshold,
        } => {
            let mut cfg = ScanCfg::manage(&scan_mgr_params);
            cfg.duration_s = duration;
            cfg.z_step_mm = z_step;
            cfg.disease_threshold = threshold;

            run_scan(mech, percep_params, scan_mgr_params, &session, cfg)?;
        }

        BotCmd::Analyze { count } => {
            let mut percep =
                Percep::new(percep_params).wrap_err("Could not initialise perception")?;

            let verdicts = percep
                .analyze_recent(
                    count,
                    scan_mgr_params.default_disease_threshold,
                    scan_mgr_params.min_confidence,
                )
                .wrap_err("Analysis failed")?;

            if verdicts.is_empty() {
                info!("No captured frames found");
            }

            for (path, verdict) in verdicts {
                info!(
                    "{:?}: {} ({:.0}%){}",
                    path.file_name().unwrap_or_default(),
                    verdict.label,
                    verdict.confidence * 100.0,
                    if verdict.is_diseased { " DISEASED" } else { "" }
                );
            }
        }

        BotCmd::Status => {
            let status = mech.status();

            info!("Z:       {}", status.z);
            info!("R:       {}", status.r);
            info!("theta:   {}", status.theta);
            info!("Gripper: {}", status.gripper);
        }
    }

    // ---- SHUTDOWN ----

    session.exit();

    Ok(())
}

/// Build the mechanisms set on the robot's GPIO drivers.
#[cfg(target_arch = "arm")]
fn init_mech(params: MechParams, store: StateStore) -> Result<Mech, Report> {
    Mech::new_rpi(params, store).wrap_err("Could not initialise the GPIO drivers")
}

/// Build a simulated mechanisms set, used off the robot.
#[cfg(not(target_arch = "arm"))]
fn init_mech(params: MechParams, store: StateStore) -> Result<Mech, Report> {
    warn!("Not running on the robot, using simulated motor drivers");

    let (mech, _) = Mech::new_sim(params, store);
    Ok(mech)
}

/// Run a scan, wiring Ctrl-C to scan cancellation for its duration.
fn run_scan(
    mech: Mech,
    percep_params: PercepParams,
    scan_mgr_params: ScanMgrParams,
    session: &Session,
    cfg: ScanCfg,
) -> Result<(), Report> {
    let percep = Percep::new(percep_params).wrap_err("Could not initialise perception")?;

    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            warn!("Ctrl-C received, cancelling the scan");
            cancel.cancel();
        })
        .wrap_err("Could not install the Ctrl-C handler")?;
    }

    let mut mgr = ScanMgr::new(
        mech,
        percep,
        scan_mgr_params,
        Some(session.clone()),
        cancel,
    );

    mgr.run(cfg).wrap_err("Scan failed")?;

    Ok(())
}

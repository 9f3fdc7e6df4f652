//! # Logger initialisation
//!
//! Initialises a [`fern`] logger which outputs to both stdout and the
//! session's log file. Log lines are stamped with the elapsed session time so
//! that hardware actions can be correlated with scan events.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::*;
use thiserror::Error;

pub use log::LevelFilter;

// Internal imports
use crate::session::{self, Session};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur during logger initialisation.
#[derive(Error, Debug)]
pub enum LoggerInitError {
    #[error("The minimum log level must be at least Info, got {0}")]
    InvalidMinLevel(LevelFilter),

    #[error("Error applying the logger configuration: {0}")]
    ApplyError(log::SetLoggerError),

    #[error("Cannot open the session log file: {0}")]
    LogFileError(std::io::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// The `min_level` gives the minimum level to log, which must show at least
/// `Info` messages. Output goes to stdout and to the session's log file.
pub fn logger_init(min_level: LevelFilter, session: &Session) -> Result<(), LoggerInitError> {
    // Verify that the log level shows at least info messages, since these are
    // used to record command execution in the session
    if min_level < LevelFilter::Info {
        return Err(LoggerInitError::InvalidMinLevel(min_level));
    }

    fern::Dispatch::new()
        .format(|out, message, record| {
            // Debug and trace messages include the target to make tracking
            // down their source easier
            if record.level() > log::Level::Info {
                out.finish(format_args!(
                    "[{:10.6} {} {}] {}",
                    session::get_elapsed_seconds(),
                    level_to_str(record.level()),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{:10.6} {}] {}",
                    session::get_elapsed_seconds(),
                    level_to_str(record.level()),
                    message
                ))
            }
        })
        .level(min_level)
        .chain(std::io::stdout())
        .chain(fern::log_file(&session.log_file_path).map_err(LoggerInitError::LogFileError)?)
        .apply()
        .map_err(LoggerInitError::ApplyError)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a level into a fixed width coloured string
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Error => "ERR".red(),
        log::Level::Warn => "WRN".yellow(),
        log::Level::Info => "INF".normal(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Trace => "TRC".dimmed(),
    }
}

//! Host platform utility functions

use std::path::PathBuf;

/// Name of the environment variable pointing at the software root directory.
///
/// The root holds the `params`, `state`, `captures` and `sessions`
/// directories.
pub const SW_ROOT_ENV_VAR: &str = "HERBOT_SW_ROOT";

/// Retrieve the software root directory from the environment.
pub fn get_herbot_sw_root() -> Result<PathBuf, std::env::VarError> {
    Ok(PathBuf::from(std::env::var(SW_ROOT_ENV_VAR)?))
}

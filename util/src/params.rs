//! Parameter file loading
//!
//! Parameters are TOML files living in the `params` directory under the
//! software root. Each module defines its own parameter struct and loads it
//! with [`load`], for example:
//!
//! ```ignore
//! let params: MechParams = util::params::load("mech.toml")?;
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur during parameter loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The software root environment variable (HERBOT_SW_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot read the parameter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot deserialise the parameter file: {0}")]
    DeserialiseError(toml::de::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter struct from the given file in the `params` directory
/// under the software root.
///
/// If `param_file_path` has no extension `.toml` is assumed.
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    let mut path = crate::host::get_herbot_sw_root().map_err(|_| LoadError::SwRootNotSet)?;
    path.push("params");
    path.push(param_file_path);

    if path.extension().is_none() {
        path.set_extension("toml");
    }

    let param_str = fs::read_to_string(&path).map_err(LoadError::FileLoadError)?;

    toml::from_str(&param_str).map_err(LoadError::DeserialiseError)
}

//! Gateway configuration.
//!
//! Variables come from the process environment, optionally seeded from an
//! env file. Values already present in the environment win over the file.

use std::path::{Path, PathBuf};

use relay::RelayConfig;

/// Env file read when no path is given on the command line.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Outcome of loading the env file, reported once logging is up.
#[derive(Debug)]
pub enum EnvFile {
    Loaded(PathBuf),
    /// The default file does not exist; the process environment is used as is.
    Absent,
}

/// Loads `path` (or [`DEFAULT_ENV_FILE`]) into the process environment.
///
/// A missing default file is not an error; a missing explicit file is.
pub fn load_env_file(path: Option<&str>) -> Result<EnvFile, String> {
    match path {
        Some(p) => dotenvy::from_path(Path::new(p))
            .map(|()| EnvFile::Loaded(PathBuf::from(p)))
            .map_err(|e| format!("failed to load env file {p}: {e}")),
        None => match dotenvy::from_filename(DEFAULT_ENV_FILE) {
            Ok(loaded) => Ok(EnvFile::Loaded(loaded)),
            Err(e) if e.not_found() => Ok(EnvFile::Absent),
            Err(e) => Err(format!("failed to load {DEFAULT_ENV_FILE}: {e}")),
        },
    }
}

/// Reads the relay configuration from the (now populated) environment.
pub fn relay_config() -> Result<RelayConfig, String> {
    RelayConfig::from_env().map_err(|e| format!("configuration error: {e}"))
}

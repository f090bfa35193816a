//! Error taxonomy shared by the readiness core.
//!
//! Command execution never surfaces these as failures on its own: the runner
//! folds them into a [`CommandResult`](crate::cli::CommandResult) so callers
//! treat an unavailable CLI as data. They do surface from suggestion
//! decisions, the installer and the collaborator traits.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: std::time::Duration },

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompanionError>;

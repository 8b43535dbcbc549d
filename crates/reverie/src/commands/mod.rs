//! Command handlers.

pub mod apikey;
pub mod initdb;
pub mod start;
pub mod status;

/// Shared context passed to every command.
pub struct Context {
    /// Metadata database path.
    pub db_path: String,
    /// Verbose output requested.
    pub verbose: bool,
}

/// Command failure, split by exit code.
#[derive(Debug)]
pub enum CliError {
    /// Bad arguments or configuration; exit code 1.
    Validation(String),
    /// Anything that failed at runtime; exit code 2.
    Runtime(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Runtime(e)
    }
}

/// Result type for command handlers.
pub type CmdResult = Result<(), CliError>;

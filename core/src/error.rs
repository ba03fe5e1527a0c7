//! Error types for bogobench-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid selection inputs or option conflicts detected before launch
    #[error("plan error: {0}")]
    Plan(String),

    /// Selection named a stressor that does not exist
    #[error("unknown stressor: '{name}', valid names are: {valid}")]
    UnknownStressor {
        /// The name that failed to resolve
        name: String,
        /// Space-separated listing of valid names
        valid: String,
    },

    /// Nothing runnable remained after planning
    #[error("no stress workers invoked")]
    NothingToRun {
        /// True when every dropped entry was dropped as unsupported,
        /// which is reported as a successful no-op run
        unsupported_only: bool,
    },

    /// Shared-memory or sentinel mapping failure
    #[error("shared mapping failed: {0}")]
    Mapping(String),

    /// A required sysconf value could not be read
    #[error("sysconf failed: {0}")]
    Sysconf(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

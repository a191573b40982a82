//! Error types for starting a conversion.

use std::io::Error as IoError;
use std::path::PathBuf;

use thiserror::Error;

/// Why a set of parameters was rejected before any run started.
///
/// Each variant is a distinct category a front end can show to the user.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No source video has been chosen.
    #[error("No video file selected")]
    MissingSource,

    /// The output directory field is empty.
    #[error("No output directory selected")]
    MissingOutputDirectory,

    /// Frame rate is not a number, or not greater than zero.
    #[error("Frame rate must be a number greater than 0 (got '{0}')")]
    InvalidFrameRate(String),

    /// Start index is not a whole number, or is negative.
    #[error("Start index must be a whole number of 0 or more (got '{0}')")]
    InvalidStartIndex(String),

    /// The output directory does not exist and could not be created.
    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: IoError,
    },
}

/// Why [`Session::start`](crate::Session::start) refused to begin a run
#[derive(Debug, Error)]
pub enum StartError {
    #[error("A conversion is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

use thiserror::Error;

use pbcompiler_backend::{PersistenceError, ValidationError};

/// A failed board call. `message` is the vendor error text, passed through unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{call} failed{}: {message} (code {code})", .board.map(|b| format!(" on board {}", b)).unwrap_or_default())]
pub struct HardwareError {
    pub call: &'static str,
    pub board: Option<usize>,
    pub code: i32,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("DAQ channel name ({0}) can't be recognized, expecting Dev<n>/port<n>/line<n>")]
    Malformed(String),

    #[error("Specified DAQ channel ({0}) doesn't exist in this computer")]
    NotFound(String),

    #[error("DAQ error on {channel}: {message} (code {code})")]
    Driver {
        channel: String,
        code: i32,
        message: String,
    },

    #[error("No trigger registration with id {0}")]
    UnknownHandle(u64),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("A scan is in progress")]
    Busy,
}

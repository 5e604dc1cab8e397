//! Startup validation errors.
//!
//! Admission-time rejections live with the entry engine; these are the
//! configuration faults that must stop the process before it trades.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    /// Mode table has no entries at all.
    #[error("mode table is empty")]
    EmptyModeTable,

    /// The configured default mode is missing from the table.
    #[error("default mode '{mode}' is not defined in the mode table")]
    UnknownDefaultMode { mode: String },

    /// A score table lacks the floor entry at threshold 0.
    #[error("score table '{table}' has no entry for threshold 0")]
    MissingZeroThreshold { table: String },

    /// Score routing targets a mode the table does not define.
    #[error("score_to_mode targets unknown mode '{mode}'")]
    UnknownMappedMode { mode: String },

    /// Poll interval must be positive.
    #[error("poll interval must be at least 1 second")]
    InvalidPollInterval,
}

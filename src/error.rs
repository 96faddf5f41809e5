//! Error types for the zonal-promise engine.

use thiserror::Error as ThisError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-level errors. Note that most promise rejections carry an
/// arbitrary [`crate::Value`] reason, not one of these variants — `Error`
/// is reserved for failures the engine itself raises (resolution-procedure
/// violations) rather than user-level rejections.
#[derive(ThisError, Debug, Clone)]
pub enum Error {
    /// A promise's executor attempted to resolve the promise with itself.
    #[error("a promise cannot be resolved with itself")]
    SelfResolution,
}

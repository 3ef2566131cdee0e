//! Error types for the nirva runtime
//!
//! This module defines the error hierarchy shared by every layer above the
//! bundle model. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.

use crate::value::StrandType;
use std::io;
use thiserror::Error;

/// Result type alias for nirva operations
pub type Result<T> = std::result::Result<T, Error>;

/// Alias used by crates that layer their own `Error` on top of this one
pub type NirvaError = Error;

/// Error types for bundle, blueprint and hook operations
#[derive(Debug, Error)]
pub enum Error {
    /// A value of the wrong type was written to, or read from, a strand
    #[error("Wrong type for strand '{strand}': expected {expected}, got {actual}")]
    WrongType {
        /// Strand name
        strand: String,
        /// Type the strand is locked to
        expected: StrandType,
        /// Type that was supplied
        actual: StrandType,
    },

    /// Strand, bundle or key not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ownership transfer attempted into a slot that cannot own
    #[error("Not owner: {0}")]
    NotOwner(String),

    /// Reparenting would create an ownership cycle or cross the structure root
    #[error("Ownership violation: {0}")]
    Ownership(String),

    /// Strand is read-only
    #[error("Strand '{0}' is read-only")]
    ReadOnly(String),

    /// Conflicting or malformed bundledef
    #[error("Schema error: {0}")]
    Schema(String),

    /// Malformed wire form, argument format or type character
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A "before" hook callback refused the change
    #[error("Change to '{strand}' vetoed by hook callback '{callback}'")]
    Vetoed {
        /// Strand that was being changed
        strand: String,
        /// Name of the vetoing callback
        callback: String,
    },

    /// Bundle has been destroyed and may not be used
    #[error("Bundle {0} is a zombie")]
    Zombie(u64),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    /// True for errors that leave the target untouched and may be retried
    pub fn is_vetoed(&self) -> bool {
        matches!(self, Error::Vetoed { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidFormat(e.to_string())
    }
}

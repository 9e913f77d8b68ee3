//! Error types for certsync

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

use crate::client::PersistenceError;

/// Result type alias for certsync
pub type Result<T> = std::result::Result<T, Error>;

/// certsync errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unparseable configuration, certificate or key material
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection, handshake or timeout failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with something other than 200
    #[error("Server returned {status}: {body:?}")]
    Rejected {
        /// HTTP status of the response
        status: StatusCode,
        /// Trimmed response body
        body: String,
    },

    /// Received material could not be classified or written
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the server must stop on this error.
    ///
    /// Only configuration problems are startup-fatal; everything else is
    /// scoped to a single connection or request and the server keeps serving.
    #[must_use]
    pub fn is_fatal_for_server(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

//! Error types for HyDFS.
//!
//! Error taxonomy follows the component boundaries of the system: transport
//! failures, placement ambiguity, request-level rejections, and storage
//! failures are kept distinct so callers can decide whether to retry,
//! surface to the client, or escalate.

use std::time::Duration;
use thiserror::Error;

/// Main error type for HyDFS.
#[derive(Error, Debug)]
pub enum Error {
    /// A control or RPC request exceeded its deadline.
    #[error("timeout after {duration:?} during {operation}")]
    Timeout { operation: String, duration: Duration },

    /// The peer could not be reached at all (connection refused, no route).
    #[error("peer {peer} unreachable: {message}")]
    Unreachable { peer: String, message: String },

    /// A control frame or RPC body could not be parsed.
    #[error("malformed message: {message}")]
    Malformed { message: String },

    /// No primary could be resolved for a key (empty or unstable live view).
    #[error("not ready: {message}")]
    NotReady { message: String },

    /// `create` was rejected because the file already exists at the primary.
    #[error("file '{name}' already exists")]
    AlreadyExists { name: String },

    /// `append`/`get` was rejected because the file does not exist.
    #[error("file '{name}' not found")]
    NotFound { name: String },

    /// A PUT upload arrived without a matching Reservation.
    #[error("upload of '{name}' has no matching authorization")]
    UnauthorizedUpload { name: String },

    /// A request was missing a required field or was otherwise malformed.
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// A local disk operation failed.
    #[error("I/O error during {operation}: {message}")]
    Io { operation: String, message: String },

    /// Cluster membership state is inconsistent with the request.
    #[error("membership error: {message}")]
    Membership { message: String },

    /// The configuration bundle is invalid.
    #[error("configuration error in field {field:?}: {message}")]
    Config { field: Option<String>, message: String },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io { operation: "io".to_string(), message: err.to_string() }
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

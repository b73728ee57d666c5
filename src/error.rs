//! Client error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::fabric::{ResolveError, WcStatus};

/// Why waiting for a completion failed.
#[derive(Debug, Error)]
pub enum CompletionFailure {
    /// The poll call itself returned an error.
    #[error("{0}")]
    Poll(#[from] io::Error),

    /// A completion was reaped, but with a non-success status.
    #[error("work completion error: {0}")]
    Status(WcStatus),

    /// No completion arrived before the configured deadline.
    #[error("no completion within {0:?}")]
    TimedOut(Duration),
}

/// Errors terminating a client run.
///
/// Each transport-facing variant carries the name of the failing operation
/// and the underlying reason; `Display` renders them as `op: reason`.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Address resolution failed.
    #[error("{op}: {source}")]
    Resolution {
        op: &'static str,
        source: ResolveError,
    },

    /// The endpoint could not be created with the requested capabilities.
    #[error("{op}: {source}")]
    Creation { op: &'static str, source: io::Error },

    /// Memory registration failed.
    #[error("{op}: {source}")]
    Registration { op: &'static str, source: io::Error },

    /// Posting a work request failed.
    #[error("{op}: {source}")]
    Post { op: &'static str, source: io::Error },

    /// The connection handshake failed.
    #[error("{op}: {source}")]
    Connect { op: &'static str, source: io::Error },

    /// Waiting for a completion failed.
    #[error("{op}: {source}")]
    Completion {
        op: &'static str,
        source: CompletionFailure,
    },

    /// A step was attempted before the resource it needs was acquired.
    #[error("{op}: {missing} not available")]
    OutOfOrder {
        op: &'static str,
        missing: &'static str,
    },

    /// Bad configuration.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Name of the failing operation.
    pub fn op(&self) -> &'static str {
        match self {
            ClientError::Resolution { op, .. }
            | ClientError::Creation { op, .. }
            | ClientError::Registration { op, .. }
            | ClientError::Post { op, .. }
            | ClientError::Connect { op, .. }
            | ClientError::Completion { op, .. }
            | ClientError::OutOfOrder { op, .. } => op,
            ClientError::Config(_) => "configuration",
        }
    }

    /// Process status for this failure: the resolver's own (non-zero) code
    /// for resolution failures, `-1` for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Resolution { source, .. } if source.code != 0 => source.code,
            _ => -1,
        }
    }
}

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::math::MatrixError;

/// Result alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors raised while talking to the engine or validating a request locally.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to connect to engine at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("engine rejected handshake: expected READY, got {0:?}")]
    HandshakeRejected(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("engine connection closed")]
    ConnectionClosed,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("invalid item: the item identifier is not valid or no longer exists")]
    InvalidItem,
    #[error("engine reported a recoverable failure: {0}")]
    RemoteSoftFailure(String),
    #[error("engine reported a failure: {0}")]
    RemoteHardFailure(String),
    #[error("engine reported an invalid license")]
    Licensing,
    #[error("engine returned unknown status {0}")]
    UnknownStatus(i32),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error("invalid move target: {0}")]
    InvalidTarget(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("parameter {name:?} did not reach the expected value within {timeout:?}")]
    SignalTimeout { name: String, timeout: Duration },
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("failed to spawn engine: {0}")]
    EngineStart(String),
    #[error("engine terminated early with status {0}")]
    EngineExited(ExitStatus),
    #[error("engine did not report a listen address within {0:?}")]
    StartupTimeout(Duration),
}

impl LinkError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        LinkError::ProtocolViolation(message.into())
    }

    pub(crate) fn invalid_target(message: impl Into<String>) -> Self {
        LinkError::InvalidTarget(message.into())
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        LinkError::InvalidArgument(message.into())
    }

    pub(crate) fn engine_start(err: impl Into<String>) -> Self {
        LinkError::EngineStart(err.into())
    }

    /// Whether this error left the connection unusable.
    ///
    /// Once this returns `true` every further call on the same link fails with
    /// [`LinkError::ConnectionClosed`]; a new link must be opened.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Connect { .. }
                | LinkError::HandshakeRejected(_)
                | LinkError::Io(_)
                | LinkError::Timeout(_)
                | LinkError::ConnectionClosed
                | LinkError::ProtocolViolation(_)
        )
    }

    /// Whether the engine answered but flagged the request as recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LinkError::InvalidItem | LinkError::RemoteSoftFailure(_)
        )
    }
}

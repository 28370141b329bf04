use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of the device-control transport. Never retried automatically.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("bridge io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed snapshot: {0}")]
    Snapshot(String),
    #[error("malformed bounds {0:?}")]
    Bounds(String),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("store error: {0}")]
    Store(String),
    #[error("profile {} is locked by another controller", .0.display())]
    ProfileLocked(PathBuf),
    #[error("no menu has been entered yet")]
    NoMenu,
    #[error("no app package is open")]
    NoPackage,
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}

//! Error taxonomy shared by the registry, the bridge and the collaborators

use thiserror::Error;

use crate::device::DeviceId;

/// Errors surfaced by adbridge components
///
/// Payloads are plain strings so the error is `Clone`: a single handshake
/// result is handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("authentication failed for {identity}: {reason}")]
    AuthenticationFailed { identity: DeviceId, reason: String },

    #[error("channel open rejected for service {service}: {reason}")]
    ChannelOpenRejected { service: String, reason: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote connection closed")]
    RemoteClosed,
}

impl BridgeError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

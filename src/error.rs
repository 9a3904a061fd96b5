//! Error types for the dongle protocol engine.
//!
//! Only caller-facing failures live here. Framing corruption is recovered inside
//! the frame assembler and never becomes a `DongleError`; malformed payloads are
//! reported by the decoders through [`crate::decoders::DecodeError`] and counted
//! by the dispatcher.

use std::fmt::Display;

use thiserror::Error;

use crate::io::LinkId;

/// Result type alias for dongle operations.
pub type Result<T, E = DongleError> = std::result::Result<T, E>;

/// Main error type for dongle operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DongleError {
    #[error("Serial transport error on {port}: {details}")]
    Transport { port: String, details: String },

    #[error("Connection handle {handle} is not registered on any link")]
    UnknownHandle { handle: u8 },

    #[error("Dongle is already connected")]
    AlreadyConnected,

    #[error("Dongle is not connected")]
    NotConnected,

    #[error("Command must be exactly {expected} bytes, got {actual}")]
    InvalidCommand { expected: usize, actual: usize },

    #[error("Frame payload of {len} bytes exceeds the {max} byte maximum")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Failed to start decoding thread for link {link}")]
    Spawn {
        link: LinkId,
        #[source]
        source: std::io::Error,
    },
}

impl DongleError {
    /// Transport failure on the named port.
    pub fn transport(port: impl Into<String>, details: impl Display) -> Self {
        DongleError::Transport {
            port: port.into(),
            details: details.to_string(),
        }
    }

    pub fn config(details: impl Into<String>) -> Self {
        DongleError::Config {
            details: details.into(),
        }
    }

    /// Whether the failure came from the physical link rather than API misuse.
    pub fn is_transport(&self) -> bool {
        matches!(self, DongleError::Transport { .. } | DongleError::Spawn { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_message_names_port() {
        let err = DongleError::transport("/dev/ttyUSB0", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "Serial transport error on /dev/ttyUSB0: No such file or directory"
        );
        assert!(err.is_transport());
    }

    #[test]
    fn test_state_errors_are_not_transport() {
        assert!(!DongleError::NotConnected.is_transport());
        assert!(!DongleError::AlreadyConnected.is_transport());
        assert!(!DongleError::UnknownHandle { handle: 3 }.is_transport());
    }

    #[test]
    fn test_invalid_command_message() {
        let err = DongleError::InvalidCommand {
            expected: 16,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Command must be exactly 16 bytes, got 4");
    }
}

use std::io;

use thiserror::Error;

/// A slice of the inbound byte stream that could not be turned into a frame.
///
/// Decode errors are recoverable: the offending bytes are dropped and the
/// reader keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
}

/// A complete line that is not a usable request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Missing request type")]
    MissingType,
    #[error("{0}")]
    Field(String),
}

/// Failures raised by the credential and message stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("storage record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Everything that can go wrong while a connection is being served.
///
/// Only [`HubError::Transport`] ends the connection; the other variants are
/// reported back to the peer that caused them.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    ProtocolDecode(#[from] DecodeError),
    #[error(transparent)]
    FieldValidation(#[from] FrameError),
    #[error("transport failed: {0}")]
    Transport(#[from] io::Error),
    #[error("Storage unavailable")]
    Collaborator(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_wraps_each_failure_kind() {
        assert!(matches!(
            HubError::from(io::Error::from(io::ErrorKind::BrokenPipe)),
            HubError::Transport(_)
        ));
        assert!(matches!(
            HubError::from(DecodeError::InvalidUtf8),
            HubError::ProtocolDecode(_)
        ));
        assert!(matches!(
            HubError::from(StoreError::Io(io::Error::other("disk"))),
            HubError::Collaborator(_)
        ));
    }

    #[test]
    fn messages_are_client_facing() {
        assert_eq!(
            DecodeError::FrameTooLong { limit: 16 }.to_string(),
            "Frame exceeds 16 bytes"
        );
        assert_eq!(
            HubError::from(FrameError::Field("Sender and message required".into())).to_string(),
            "Sender and message required"
        );
        assert_eq!(
            HubError::from(StoreError::Io(io::Error::other("/var/lib/relay: disk full")))
                .to_string(),
            "Storage unavailable"
        );
    }
}

//! Unified error type for the Warden server.

use warden_protocol::ProtocolError;
use warden_session::SessionError;
use warden_store::StoreError;
use warden_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates `From` impls, so the
/// `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Listener or socket failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode, or classification failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session or account operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A store driver failed during startup.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A setting could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let warden_err: WardenError = err.into();
        assert!(matches!(warden_err, WardenError::Transport(_)));
        assert!(warden_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::UnknownKind("ping".into());
        let warden_err: WardenError = err.into();
        assert!(matches!(warden_err, WardenError::Protocol(_)));
        assert_eq!(warden_err.to_string(), "unknown request type: ping");
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::InvalidOrExpired;
        let warden_err: WardenError = err.into();
        assert!(matches!(warden_err, WardenError::Session(_)));
    }

    #[test]
    fn test_from_store_error() {
        let err = StoreError::Unavailable("redis".into());
        let warden_err: WardenError = err.into();
        assert!(matches!(warden_err, WardenError::Store(_)));
    }
}

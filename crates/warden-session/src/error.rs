//! Error types for the session layer.

use warden_store::StoreError;

use crate::TokenError;

/// Errors surfaced by session and auth operations.
///
/// Each variant maps to exactly one client-facing message through
/// [`client_message`](SessionError::client_message); internal detail
/// (store errors, entropy failures) never reaches the wire.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Bad input. The message is shown to the client as-is.
    #[error("{0}")]
    Validation(String),

    /// The token is unknown, revoked, or past its expiry. These cases are
    /// deliberately indistinguishable.
    #[error("invalid or expired token")]
    InvalidOrExpired,

    /// Unknown user or wrong password.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username or email already exists")]
    UserExists,

    /// The authoritative cache (or the user directory) failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The entropy source failed. The server must stop issuing tokens.
    #[error(transparent)]
    Entropy(#[from] TokenError),
}

impl SessionError {
    /// The text sent back to the client.
    pub fn client_message(&self) -> String {
        match self {
            SessionError::StoreUnavailable(_) | SessionError::Entropy(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// `true` for failures after which the server must shut down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Entropy(_))
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::StoreUnavailable(err)
    }
}

//! Credential tokens.
//!
//! A token is 32 bytes from the operating system's CSPRNG, encoded as
//! URL-safe base64 without padding, which always yields 43 characters.
//! Tokens are opaque: nothing about the user or the expiry is encoded in
//! them, so they can only be checked by looking them up.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Number of random bytes behind every token.
pub const TOKEN_BYTES: usize = 32;

/// Length of the encoded form.
pub const TOKEN_LEN: usize = 43;

/// An opaque session credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// A short prefix that is safe to put in logs.
    pub fn fingerprint(&self) -> &str {
        fingerprint(&self.0)
    }
}

/// Prefix of a raw token string, safe to put in logs.
pub fn fingerprint(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map_or(token.len(), |(i, _)| i);
    &token[..end]
}

// Debug never prints the full secret.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}…)", self.fingerprint())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The OS entropy source failed.
#[derive(Debug, thiserror::Error)]
#[error("entropy source failed: {0}")]
pub struct TokenError(pub String);

/// Signature of a token source. [`generate`] is the only production one.
pub type TokenSource = fn() -> Result<Token, TokenError>;

/// Draws a fresh token from the OS CSPRNG.
///
/// # Errors
/// [`TokenError`] if the OS refuses to provide randomness. Callers must
/// treat this as fatal and stop issuing credentials.
pub fn generate() -> Result<Token, TokenError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| TokenError(e.to_string()))?;
    Ok(Token(URL_SAFE_NO_PAD.encode(bytes)))
}

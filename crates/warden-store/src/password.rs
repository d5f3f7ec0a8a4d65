//! Credential hashing and verification.

use std::future::Future;

use crate::StoreError;

/// Hashes and checks passwords.
///
/// Both methods are async because real hashers are deliberately slow;
/// implementations should keep that work off the async worker threads.
pub trait CredentialVerifier: Send + Sync + 'static {
    /// Produces a self-describing hash of `password` (salt included).
    fn hash(
        &self,
        password: &str,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// `true` if `password` matches `hash`. A malformed hash is a
    /// mismatch, not an error.
    fn verify(&self, hash: &str, password: &str) -> impl Future<Output = bool> + Send;
}

/// bcrypt with a configurable cost, run on the blocking thread pool.
#[cfg(feature = "bcrypt")]
#[derive(Debug, Clone, Copy)]
pub struct BcryptVerifier {
    cost: u32,
}

#[cfg(feature = "bcrypt")]
impl BcryptVerifier {
    /// Uses `bcrypt::DEFAULT_COST`.
    pub fn new() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Uses a specific cost (4..=31). Low costs are for tests only.
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }
}

#[cfg(feature = "bcrypt")]
impl Default for BcryptVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "bcrypt")]
impl CredentialVerifier for BcryptVerifier {
    async fn hash(&self, password: &str) -> Result<String, StoreError> {
        let cost = self.cost;
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| StoreError::Hash(e.to_string()))?
            .map_err(|e| StoreError::Hash(e.to_string()))
    }

    async fn verify(&self, hash: &str, password: &str) -> bool {
        let hash = hash.to_owned();
        let password = password.to_owned();
        match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "stored hash rejected by bcrypt");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "bcrypt verification task failed");
                false
            }
        }
    }
}

//! The subject a session acts as.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity is empty")]
    Empty,
    #[error("Identity unavailable: {0}")]
    Unavailable(String),
}

/// Opaque subject identifier, attached to the handshake and every outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// # Errors
    ///
    /// * [`IdentityError::Empty`] if `id` is blank
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();

        if id.trim().is_empty() {
            return Err(IdentityError::Empty);
        }

        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for Identity {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Looks up the identity of the signed-in user, e.g. from a login session.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// # Errors
    ///
    /// * If no identity can be resolved
    async fn resolve_identity(&self) -> Result<Identity, IdentityError>;
}

#[async_trait]
impl IdentityProvider for Identity {
    async fn resolve_identity(&self) -> Result<Identity, IdentityError> {
        Ok(self.clone())
    }
}

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::domain::UserId;

/// Push notification emitted whenever the provider's process-wide session changes,
/// including changes this client did not request (e.g. token expiry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(UserId),
    SignedOut,
}

/// External identity provider consumed by the session manager.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_identity(&self, email: &str, password: &str) -> Result<UserId, AuthError>;
    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, AuthError>;
    async fn end_session(&self) -> Result<(), AuthError>;
    async fn update_display_name(
        &self,
        identity: &UserId,
        display_name: &str,
    ) -> Result<(), AuthError>;

    /// Identity the provider currently considers signed in, if any.
    async fn current_identity(&self) -> Result<Option<UserId>, AuthError>;

    /// Opens a new receiver on the provider's session-change channel.
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}

/// Authentication failures. The messages are shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Failed to sign in. Please check your credentials.")]
    InvalidCredential,
    #[error("Email already in use")]
    DuplicateIdentity,
    #[error("Password is too weak")]
    WeakCredential,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// True when the provider answered and refused the request, as opposed to being unreachable.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, AuthError::Unavailable(_))
    }
}

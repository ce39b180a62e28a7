//! Credential provider trait abstraction.
//!
//! Session data (cookies) is owned by an external auth collaborator. The
//! connection manager reads it through this trait and asks for a refresh
//! after the server rejects the session.

use async_trait::async_trait;

use crate::auth::SessionCredentials;

/// Credential operation errors.
#[derive(Debug, Clone)]
pub enum CredentialsError {
    /// Failed to load credentials
    LoadFailed(String),
    /// Refresh was requested but could not be completed
    RefreshFailed(String),
    /// Credentials not found
    NotFound,
    /// IO error
    Io(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Other error
    Other(String),
}

impl std::fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsError::LoadFailed(msg) => write!(f, "Failed to load credentials: {}", msg),
            CredentialsError::RefreshFailed(msg) => {
                write!(f, "Failed to refresh credentials: {}", msg)
            }
            CredentialsError::NotFound => write!(f, "Credentials not found"),
            CredentialsError::Io(msg) => write!(f, "IO error: {}", msg),
            CredentialsError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CredentialsError::Other(msg) => write!(f, "Credentials error: {}", msg),
        }
    }
}

impl std::error::Error for CredentialsError {}

/// Source of session credentials for the pull connection.
///
/// # Example
///
/// ```ignore
/// use pullwire::traits::CredentialProvider;
///
/// async fn cookie<P: CredentialProvider>(provider: &P) -> Option<String> {
///     provider.load().await.ok()?.cookie_header()
/// }
/// ```
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current session credentials.
    async fn load(&self) -> Result<SessionCredentials, CredentialsError>;

    /// Obtain fresh credentials after the server rejected the current ones.
    ///
    /// Implementations may block on the auth collaborator; the connection
    /// manager calls this from its own worker, never from the consumer.
    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError>;
}

//! File-based credentials provider adapter.
//!
//! The auth collaborator keeps the session file up to date; this provider
//! only reads it. A refresh simply re-reads the file, picking up whatever the
//! collaborator wrote since the last load.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::auth::{SessionCredentials, SessionStore};
use crate::traits::{CredentialProvider, CredentialsError};

/// Reads session credentials from `~/.pullwire/session.json` (or a custom path).
///
/// # Example
///
/// ```ignore
/// use pullwire::adapters::FileCredentialProvider;
/// use pullwire::traits::CredentialProvider;
///
/// let provider = FileCredentialProvider::new()?;
/// let session = provider.load().await?;
/// println!("{} cookies", session.cookies.len());
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialProvider {
    store: SessionStore,
}

impl FileCredentialProvider {
    /// Provider for the default session file.
    ///
    /// # Returns
    /// The provider, or an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, CredentialsError> {
        SessionStore::new()
            .map(|store| Self { store })
            .ok_or_else(|| {
                CredentialsError::Other("Failed to determine home directory".to_string())
            })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            store: SessionStore::at(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn load(&self) -> Result<SessionCredentials, CredentialsError> {
        self.store.load()
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        self.store.load().map_err(|e| match e {
            CredentialsError::NotFound => {
                CredentialsError::RefreshFailed("session file missing".to_string())
            }
            other => other,
        })
    }
}

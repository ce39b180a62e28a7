//! In-memory credentials provider for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::auth::SessionCredentials;
use crate::traits::{CredentialProvider, CredentialsError};

/// In-memory credentials provider for testing.
///
/// `refresh()` swaps in whatever was queued with
/// [`set_refreshed`](Self::set_refreshed) and counts the call, so tests can
/// verify that a rejected session leads to a refresh.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentials {
    current: Arc<Mutex<SessionCredentials>>,
    refreshed: Arc<Mutex<Option<SessionCredentials>>>,
    load_calls: Arc<AtomicUsize>,
    refresh_calls: Arc<AtomicUsize>,
    load_should_fail: Arc<AtomicBool>,
    refresh_hangs: Arc<AtomicBool>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: SessionCredentials) -> Self {
        let provider = Self::new();
        provider.set_credentials(credentials);
        provider
    }

    pub fn set_credentials(&self, credentials: SessionCredentials) {
        *self.current.lock().unwrap() = credentials;
    }

    /// Credentials the next `refresh()` will install.
    pub fn set_refreshed(&self, credentials: SessionCredentials) {
        *self.refreshed.lock().unwrap() = Some(credentials);
    }

    pub fn set_load_should_fail(&self, should_fail: bool) {
        self.load_should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Make `refresh()` never complete, like an auth collaborator waiting
    /// on the user.
    pub fn set_refresh_hangs(&self, hangs: bool) {
        self.refresh_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentials {
    async fn load(&self) -> Result<SessionCredentials, CredentialsError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.load_should_fail.load(Ordering::SeqCst) {
            return Err(CredentialsError::LoadFailed("Mock load failure".to_string()));
        }
        Ok(self.current.lock().unwrap().clone())
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut current = self.current.lock().unwrap();
        if let Some(fresh) = self.refreshed.lock().unwrap().take() {
            *current = fresh;
        }
        Ok(current.clone())
    }
}

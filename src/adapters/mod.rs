//! Concrete implementations of trait abstractions.
//!
//! # Adapters
//!
//! - [`TungsteniteConnector`] - WebSocket transport using tokio-tungstenite
//! - [`FileCredentialProvider`] - session credentials read from a JSON file
//!
//! # Mock Implementations
//!
//! The [`mock`] submodule provides test doubles:
//! - [`mock::MockConnector`] - scripted connections with a fake server end
//! - [`mock::InMemoryCredentials`] - in-memory session credentials

pub mod file_credentials;
pub mod mock;
pub mod tungstenite;

pub use file_credentials::FileCredentialProvider;
pub use mock::{InMemoryCredentials, MockConnector, MockServer};
pub use tungstenite::TungsteniteConnector;

//! Mock implementations for testing.
//!
//! Test doubles for the transport and credential traits, enabling tests of
//! the connection manager without network or file system access.
//!
//! # Available Mocks
//!
//! - [`MockConnector`] - scripted connect outcomes with a controllable server end
//! - [`InMemoryCredentials`] - in-memory session credentials with refresh counting

pub mod connector;
pub mod credentials;

pub use connector::{MockConnector, MockServer, RecordedAttempt};
pub use credentials::InMemoryCredentials;

//! Trait abstractions for dependency injection and testability.
//!
//! # Traits
//!
//! - [`PullConnector`] / [`FrameSink`] / [`FrameSource`] - transport to the pull server
//! - [`CredentialProvider`] - session credentials from the auth collaborator

pub mod credentials;
pub mod transport;

pub use credentials::{CredentialProvider, CredentialsError};
pub use transport::{FrameSink, FrameSource, InboundFrame, OutboundFrame, PullConnector, Transport};

//! Error types for the pull client.
//!
//! | Error | Handling |
//! |-------|----------|
//! | [`TransportError`] | end the epoch, reconnect with backoff |
//! | [`DecodeError`] | log, drop the frame, keep listening |
//! | [`RegistryError`] | programming error at startup |
//! | [`SettingsError`] | surfaced by the binary's settings loader |
//!
//! Credential failures live next to their seam in
//! [`crate::traits::CredentialsError`].

mod decode;
mod transport;

pub use decode::DecodeError;
pub use transport::TransportError;

use thiserror::Error;

/// Subscription registry misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("channel set already configured")]
    AlreadyConfigured,
}

/// Failure loading the client settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("failed to read settings from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

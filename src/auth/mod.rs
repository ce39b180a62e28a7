//! Session credentials for the pull connection.
//!
//! Acquiring a session (browser automation, token exchange) is the job of
//! an external collaborator; this module only models and stores the result.

pub mod credentials;

pub use credentials::{SessionCredentials, SessionStore};

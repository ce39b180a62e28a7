//! Connection lifecycle: state machine, reconnect backoff and the public
//! [`ConnectionManager`] handle.
//!
//! State transitions:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Subscribing -> Online
//!                     ^                                            |
//!                     +------------- Reconnecting <----------------+
//! (any) -> Closed
//! ```

mod backoff;
mod manager;
mod request;
mod state;
mod worker;

pub use backoff::BackoffState;
pub use manager::{ConnectionManager, DebugInfo};
pub use request::{ConnectRequest, ConnectionParams};

pub(crate) use worker::{Command, ReconnectCause};

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::models::{ConnectionState, ConnectionStatus};
use crate::protocol::constants::DEFAULT_REVISION;

/// Single owner of the connection state.
///
/// Check-and-set happens under the watch channel's lock, so the manager
/// handle and the worker can both request transitions without racing.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: watch::Sender<ConnectionState>,
    status: mpsc::UnboundedSender<ConnectionStatus>,
}

impl StateCell {
    pub(crate) fn new() -> (
        Self,
        watch::Receiver<ConnectionState>,
        mpsc::UnboundedReceiver<ConnectionStatus>,
    ) {
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (status, status_rx) = mpsc::unbounded_channel();
        (Self { state, status }, state_rx, status_rx)
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `next` if the state machine allows it, publishing a status
    /// notification. Returns whether the state changed.
    pub(crate) fn transition(&self, next: ConnectionState, reason: &str) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if *state != next && state.can_transition_to(next) {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        match previous {
            Some(from) => {
                info!("Pull connection {} -> {} ({})", from, next, reason);
                let _ = self.status.send(ConnectionStatus::new(next, reason));
                true
            }
            None => {
                debug!("Ignoring transition to {} from {}", next, self.get());
                false
            }
        }
    }
}

/// Counters exposed through `ConnectionManager::debug_info`.
#[derive(Debug)]
pub(crate) struct WorkerStats {
    pub(crate) reconnect_attempt: AtomicU32,
    pub(crate) epoch: AtomicU64,
    /// Last web revision announced by the server.
    pub(crate) revision: AtomicI64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            reconnect_attempt: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            revision: AtomicI64::new(DEFAULT_REVISION),
        }
    }
}

impl WorkerStats {
    pub(crate) fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.load(Ordering::Relaxed)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub(crate) fn revision(&self) -> i64 {
        self.revision.load(Ordering::Relaxed)
    }
}

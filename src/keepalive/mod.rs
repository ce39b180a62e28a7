//! Detection of silently dead connections.
//!
//! While a connection is `Online` the monitor sends a JSON-RPC ping every
//! `ping_interval`. The connection is declared dead once no inbound frame has
//! been recorded on the [`ActivityClock`] for `ping_timeout * 2`; the deadline
//! rolls forward with every frame.
//! A connection that has been quiet for half the deadline, with no ping sent
//! since its last frame, gets an extra ping so a healthy server can
//! answer in time even when `ping_interval` exceeds the deadline.
//!
//! On expiry the monitor asks the worker to reconnect and exits, so a single
//! stall produces a single reconnect. The monitor is a task of its own and
//! never runs inside the receive loop; the worker aborts it when the epoch
//! ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::connection::{Command, ReconnectCause};
use crate::protocol::{ProtocolCodec, RpcIdCounter};
use crate::traits::OutboundFrame;

/// Timestamp of the last inbound frame of the current epoch.
///
/// Subscribers are woken on every [`touch`](Self::touch).
#[derive(Debug, Clone)]
pub struct ActivityClock(Arc<watch::Sender<Instant>>);

impl ActivityClock {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Instant::now());
        Self(Arc::new(tx))
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        self.0.send_replace(Instant::now());
    }

    pub fn last(&self) -> Instant {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Instant> {
        self.0.subscribe()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KeepAliveMonitor {
    interval: Duration,
    deadline: Duration,
    epoch: u64,
    clock: ActivityClock,
    rpc_ids: RpcIdCounter,
    outgoing: mpsc::UnboundedSender<OutboundFrame>,
    commands: mpsc::UnboundedSender<Command>,
}

impl KeepAliveMonitor {
    pub(crate) fn new(
        interval: Duration,
        deadline: Duration,
        epoch: u64,
        clock: ActivityClock,
        rpc_ids: RpcIdCounter,
        outgoing: mpsc::UnboundedSender<OutboundFrame>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            interval,
            deadline,
            epoch,
            clock,
            rpc_ids,
            outgoing,
            commands,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let quiet_after = self.deadline / 2;
        let mut activity = self.clock.subscribe();

        let mut last_ping: Option<Instant> = None;

        loop {
            let last_traffic = self.clock.last();
            let nudge_due = last_ping.map_or(true, |sent| sent < last_traffic);

            tokio::select! {
                Ok(()) = activity.changed() => {}
                _ = ticker.tick() => {
                    if !self.ping() {
                        return;
                    }
                    last_ping = Some(Instant::now());
                }
                _ = sleep_until(last_traffic + quiet_after), if nudge_due => {
                    if self.clock.last() > last_traffic {
                        continue;
                    }
                    debug!("Connection quiet for {:?}, pinging early", quiet_after);
                    if !self.ping() {
                        return;
                    }
                    last_ping = Some(Instant::now());
                }
                _ = sleep_until(last_traffic + self.deadline) => {
                    if self.clock.last() + self.deadline > Instant::now() {
                        continue;
                    }
                    warn!("No traffic for {:?}, forcing reconnect", self.deadline);
                    let _ = self.commands.send(Command::Reconnect {
                        epoch: Some(self.epoch),
                        cause: ReconnectCause::KeepAliveTimeout,
                    });
                    return;
                }
            }
        }
    }

    /// Returns false once the writer is gone.
    fn ping(&self) -> bool {
        let id = self.rpc_ids.next_id();
        debug!("Keep-alive ping {}", id);
        if self
            .outgoing
            .send(OutboundFrame::Text(ProtocolCodec::encode_ping(id)))
            .is_err()
        {
            debug!("Writer gone, stopping keep-alive");
            return false;
        }
        true
    }
}

//! The connection supervisor.
//!
//! One worker runs per started manager. Each loop iteration is an *epoch*:
//! connect, subscribe, read frames until the connection ends, then wait out
//! the backoff delay. Frames of one epoch are handled strictly in arrival
//! order by this task; outbound frames go through a per-epoch writer task and
//! keep-alive pings come from a per-epoch monitor task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::backoff::BackoffState;
use super::request::{ConnectRequest, ConnectionParams};
use super::state::{StateCell, WorkerStats};
use crate::auth::SessionCredentials;
use crate::config::PullConfig;
use crate::dispatch::EventDispatcher;
use crate::error::TransportError;
use crate::keepalive::{ActivityClock, KeepAliveMonitor};
use crate::models::{ConnectionState, Event};
use crate::protocol::constants::PONG_KEYWORD;
use crate::protocol::{
    close_code, method, ProtocolCodec, Publication, RecentMessageIds, RpcIdCounter, ServerCommand,
};
use crate::subscription::SubscriptionRegistry;
use crate::traits::{
    CredentialProvider, CredentialsError, FrameSink, InboundFrame, OutboundFrame, PullConnector,
    Transport,
};

/// Fixed delay before reconnecting after the server announced a restart.
const SERVER_RESTART_DELAY: Duration = Duration::from_secs(15);

/// Fixed delay after a `channel_expire` command.
const CHANNEL_REPLACED_DELAY: Duration = Duration::from_secs(1);

/// Fixed delay after a `config_expire` command.
const CONFIG_EXPIRED_DELAY: Duration = Duration::from_secs(2);

/// How long the writer may take to flush the closing frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Requests sent to the worker by the manager handle and the keep-alive task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// End the current epoch. `epoch: None` applies to whichever epoch is live.
    Reconnect {
        epoch: Option<u64>,
        cause: ReconnectCause,
    },
    /// Announce a change of the user-status watch list.
    UserStatus { user_id: i64, subscribe: bool },
    /// Send a publication on the live connection.
    Publish(Publication),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectCause {
    KeepAliveTimeout,
    Requested,
}

#[derive(Debug)]
enum EpochEnd {
    Shutdown,
    Reconnect(Reconnect),
}

#[derive(Debug)]
struct Reconnect {
    reason: String,
    /// Server-dictated delay replacing the backoff delay
    delay: Option<Duration>,
    /// Close frame to send before dropping the connection
    close_code: Option<u16>,
}

impl Reconnect {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            delay: None,
            close_code: None,
        }
    }

    fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn closing(mut self, code: u16) -> Self {
        self.close_code = Some(code);
        self
    }
}

/// Aborts the wrapped task when dropped.
struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    /// Give the task `grace` to finish on its own before aborting it.
    async fn finish(mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.0).await.is_err() {
            debug!("Task did not finish within {:?}, aborting", grace);
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) struct Worker {
    pub(crate) connector: Arc<dyn PullConnector>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) config: PullConfig,
    pub(crate) params: ConnectionParams,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) state: Arc<StateCell>,
    pub(crate) stats: Arc<WorkerStats>,
    pub(crate) rpc_ids: RpcIdCounter,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) command_tx: mpsc::UnboundedSender<Command>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub(crate) async fn run(self) {
        let mut run = WorkerRun {
            backoff: BackoffState::new(self.config.backoff_base, self.config.backoff_max),
            dedup: RecentMessageIds::new(self.config.dedup_window),
            epoch: 0,
            refresh_credentials: false,
            auth_reported: false,
            worker: self,
        };
        run.supervise().await;
    }

    /// Finish without ever connecting.
    pub(crate) fn abandon(self, reason: &str) {
        self.state.transition(ConnectionState::Closed, reason);
        self.dispatcher.close();
    }
}

struct WorkerRun {
    worker: Worker,
    backoff: BackoffState,
    dedup: RecentMessageIds,
    epoch: u64,
    refresh_credentials: bool,
    auth_reported: bool,
}

impl WorkerRun {
    async fn supervise(&mut self) {
        info!("Pull worker started");
        let mut close_reason = "stopped";

        loop {
            if *self.worker.shutdown.borrow() {
                break;
            }

            let reconnect = match self.run_epoch().await {
                EpochEnd::Shutdown => break,
                EpochEnd::Reconnect(reconnect) => reconnect,
            };

            self.worker
                .state
                .transition(ConnectionState::Reconnecting, &reconnect.reason);

            if let Some(max) = self.worker.config.max_reconnect_attempts {
                if self.backoff.attempt() >= max {
                    error!("Giving up after {} reconnect attempts", max);
                    close_reason = "max reconnect attempts reached";
                    break;
                }
            }

            let delay = match reconnect.delay {
                Some(fixed) => self.backoff.advance_fixed(fixed),
                None => self.backoff.advance(),
            };
            self.publish_attempt();
            info!(
                "Reconnecting in {:?} (attempt {})",
                delay,
                self.backoff.attempt()
            );

            if !self.wait_backoff(delay).await {
                break;
            }
        }

        self.worker
            .state
            .transition(ConnectionState::Closed, close_reason);
        self.worker.dispatcher.close();
        info!("Pull worker stopped");
    }

    /// Sleep for `delay`. Returns false if shutdown was requested meanwhile.
    ///
    /// A manual reconnect request cuts the wait short.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                _ = shutdown_requested(&mut self.worker.shutdown) => return false,
                Some(command) = self.worker.commands.recv() => {
                    match command {
                        Command::Reconnect { epoch: None, .. } => {
                            debug!("Reconnect requested during backoff");
                            return true;
                        }
                        Command::Publish(publication) => {
                            debug!("Dropping {} publication while offline", publication.command);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn run_epoch(&mut self) -> EpochEnd {
        self.epoch += 1;
        self.worker
            .stats
            .epoch
            .store(self.epoch, std::sync::atomic::Ordering::Relaxed);
        self.worker
            .state
            .transition(ConnectionState::Connecting, "connecting");

        let provider = self.worker.credentials.clone();
        let refresh = self.refresh_credentials;
        let loaded = tokio::select! {
            loaded = fetch_credentials(provider, refresh) => loaded,
            _ = shutdown_requested(&mut self.worker.shutdown) => return EpochEnd::Shutdown,
        };
        let credentials = self.accept_credentials(loaded);
        let request =
            ConnectRequest::build(&self.worker.params, &self.worker.registry, &credentials);
        debug!("Connecting to {}", truncate(&request.url, 100));

        let connector = self.worker.connector.clone();
        let connect_timeout = self.worker.config.connect_timeout;
        let connected = tokio::select! {
            result = tokio::time::timeout(connect_timeout, connector.connect(&request)) => {
                result.unwrap_or_else(|_| Err(TransportError::Timeout(connect_timeout.as_secs())))
            }
            _ = shutdown_requested(&mut self.worker.shutdown) => return EpochEnd::Shutdown,
        };

        let Transport { sink, mut source } = match connected {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Connection attempt failed: {}", e);
                return EpochEnd::Reconnect(self.transport_failed(e));
            }
        };

        // Authentication rides on the handshake; reaching here means accepted
        self.worker
            .state
            .transition(ConnectionState::Authenticating, "socket established");
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let writer = TaskGuard(tokio::spawn(write_loop(sink, out_rx)));

        self.worker
            .state
            .transition(ConnectionState::Subscribing, "credentials accepted");
        self.subscribe(&out_tx);

        let clock = ActivityClock::new();
        let subscribe_deadline = Instant::now() + self.worker.config.keepalive_deadline();
        let mut keepalive: Option<TaskGuard> = None;

        let end = loop {
            let online = keepalive.is_some();

            tokio::select! {
                _ = shutdown_requested(&mut self.worker.shutdown) => break EpochEnd::Shutdown,

                Some(command) = self.worker.commands.recv() => match command {
                    Command::Reconnect { epoch: Some(epoch), .. } if epoch != self.epoch => {
                        debug!("Ignoring reconnect request from epoch {}", epoch);
                    }
                    Command::Reconnect { cause: ReconnectCause::KeepAliveTimeout, .. } => {
                        break EpochEnd::Reconnect(
                            Reconnect::new("keep-alive timeout").closing(close_code::STUCK),
                        );
                    }
                    Command::Reconnect { cause: ReconnectCause::Requested, .. } => {
                        break EpochEnd::Reconnect(
                            Reconnect::new("reconnect requested").closing(close_code::NORMAL_CLOSURE),
                        );
                    }
                    Command::UserStatus { user_id, subscribe } => {
                        let request = ProtocolCodec::encode_user_status_subscription(
                            user_id,
                            subscribe,
                            self.worker.rpc_ids.next_id(),
                        );
                        send_text(&out_tx, request);
                    }
                    Command::Publish(publication) => {
                        let request =
                            ProtocolCodec::encode_publish(&publication, self.worker.rpc_ids.next_id());
                        send_text(&out_tx, request);
                    }
                },

                _ = sleep_until(subscribe_deadline), if !online => {
                    warn!("No response to subscribe within {:?}", self.worker.config.keepalive_deadline());
                    break EpochEnd::Reconnect(
                        Reconnect::new("subscribe timed out").closing(close_code::STUCK),
                    );
                }

                frame = source.next_frame() => match frame {
                    Some(Ok(InboundFrame::Data(bytes))) => {
                        clock.touch();
                        if keepalive.is_none() {
                            keepalive = Some(self.go_online(&clock, &out_tx));
                        }
                        if let Some(reconnect) = self.handle_data(&bytes, &out_tx) {
                            break EpochEnd::Reconnect(reconnect);
                        }
                    }
                    Some(Ok(InboundFrame::Heartbeat)) => {
                        clock.touch();
                        if keepalive.is_none() {
                            keepalive = Some(self.go_online(&clock, &out_tx));
                        }
                    }
                    Some(Ok(InboundFrame::Close { code, reason })) => {
                        break EpochEnd::Reconnect(self.server_closed(code, &reason));
                    }
                    Some(Err(e)) => {
                        warn!("Pull connection error: {}", e);
                        break EpochEnd::Reconnect(self.transport_failed(e));
                    }
                    None => {
                        info!("Pull connection closed by peer");
                        break EpochEnd::Reconnect(Reconnect::new("connection closed"));
                    }
                },
            }
        };

        // The monitor must not outlive the epoch
        drop(keepalive);

        let close_code = match &end {
            EpochEnd::Shutdown => Some(close_code::MANUAL),
            EpochEnd::Reconnect(reconnect) => reconnect.close_code,
        };
        if let Some(code) = close_code {
            let _ = out_tx.send(OutboundFrame::Close {
                code,
                reason: String::new(),
            });
        }
        drop(out_tx);
        writer.finish(CLOSE_GRACE).await;

        end
    }

    fn accept_credentials(
        &mut self,
        loaded: Result<SessionCredentials, CredentialsError>,
    ) -> SessionCredentials {
        match loaded {
            Ok(credentials) => {
                self.refresh_credentials = false;
                if credentials.is_expired() {
                    warn!("Session credentials are expired");
                }
                credentials
            }
            Err(e) => {
                warn!("Could not load session credentials: {}", e);
                SessionCredentials::default()
            }
        }
    }

    /// Announce the channel set, the status watch list and a ping so any live
    /// server answers with a first frame.
    fn subscribe(&self, out: &mpsc::UnboundedSender<OutboundFrame>) {
        let registry = &self.worker.registry;
        let rpc_ids = &self.worker.rpc_ids;

        debug!("Subscribing to {} channels", registry.channels().len());
        send_text(out, registry.build_subscription_request());
        for request in registry.build_status_requests(|| rpc_ids.next_id()) {
            send_text(out, request);
        }
        send_text(out, ProtocolCodec::encode_ping(rpc_ids.next_id()));
    }

    fn go_online(
        &mut self,
        clock: &ActivityClock,
        out: &mpsc::UnboundedSender<OutboundFrame>,
    ) -> TaskGuard {
        self.worker
            .state
            .transition(ConnectionState::Online, "subscribed");
        self.backoff.reset();
        self.publish_attempt();
        self.auth_reported = false;

        let monitor = KeepAliveMonitor::new(
            self.worker.config.ping_interval,
            self.worker.config.keepalive_deadline(),
            self.epoch,
            clock.clone(),
            self.worker.rpc_ids.clone(),
            out.clone(),
            self.worker.command_tx.clone(),
        );
        TaskGuard(monitor.spawn())
    }

    /// Decode and route one data frame.
    ///
    /// Undecodable frames are logged and dropped; the loop keeps listening.
    fn handle_data(
        &mut self,
        bytes: &[u8],
        out: &mpsc::UnboundedSender<OutboundFrame>,
    ) -> Option<Reconnect> {
        let envelopes = match ProtocolCodec::decode_batch(bytes) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return None;
            }
        };

        let mut outcome = None;
        for envelope in envelopes {
            if envelope.method == method::PING {
                let reply = match envelope.rpc_id {
                    Some(id) => ProtocolCodec::encode_pong(id),
                    None => PONG_KEYWORD.to_string(),
                };
                send_text(out, reply);
            }

            if let Some(mid) = envelope.message_id() {
                send_text(
                    out,
                    ProtocolCodec::encode_ack(&mid, self.worker.rpc_ids.next_id()),
                );
                if !self.dedup.observe(&mid) {
                    debug!("Skipping duplicate message {}", mid);
                    continue;
                }
            }

            if let Some(command) = ProtocolCodec::server_command(&envelope) {
                if let Some(reconnect) = self.server_command(command) {
                    outcome = Some(reconnect);
                }
            }

            self.worker
                .dispatcher
                .dispatch(ProtocolCodec::to_event(&envelope));
        }
        outcome
    }

    fn server_command(&mut self, command: ServerCommand) -> Option<Reconnect> {
        info!("Server command: {:?}", command);
        let reconnect = match command {
            ServerCommand::ChannelReplaced => {
                self.refresh_credentials = true;
                Reconnect::new("channel replaced").after(CHANNEL_REPLACED_DELAY)
            }
            ServerCommand::ConfigExpired => {
                self.refresh_credentials = true;
                Reconnect::new("config expired").after(CONFIG_EXPIRED_DELAY)
            }
            ServerCommand::ServerRestarted => {
                Reconnect::new("server restarted").after(SERVER_RESTART_DELAY)
            }
            ServerCommand::RevisionChanged(revision) => {
                self.worker
                    .stats
                    .revision
                    .store(revision, std::sync::atomic::Ordering::Relaxed);
                return None;
            }
        };
        Some(reconnect.closing(close_code::NORMAL_CLOSURE))
    }

    fn server_closed(&mut self, code: u16, reason: &str) -> Reconnect {
        info!("Server closed connection: {} {}", code, reason);
        let error = TransportError::Closed {
            code,
            reason: reason.to_string(),
        };
        if error.is_auth_rejection() {
            return self.transport_failed(error);
        }

        if close_code::requires_refresh(code) {
            self.refresh_credentials = true;
        }
        let reconnect = Reconnect::new(error.to_string());
        if code == close_code::SERVER_RESTARTED {
            reconnect.after(SERVER_RESTART_DELAY)
        } else {
            reconnect
        }
    }

    fn transport_failed(&mut self, error: TransportError) -> Reconnect {
        if error.is_auth_rejection() {
            self.refresh_credentials = true;
            if !self.auth_reported {
                warn!("Pull server rejected the session: {}", error);
                self.auth_reported = true;
                self.worker
                    .dispatcher
                    .dispatch(Event::auth_rejected(error.auth_status(), &error.to_string()));
            }
        }
        Reconnect::new(error.to_string())
    }

    fn publish_attempt(&self) {
        self.worker.stats.reconnect_attempt.store(
            self.backoff.attempt(),
            std::sync::atomic::Ordering::Relaxed,
        );
    }
}

/// The auth collaborator may take arbitrarily long; callers race this
/// against shutdown.
async fn fetch_credentials(
    provider: Arc<dyn CredentialProvider>,
    refresh: bool,
) -> Result<SessionCredentials, CredentialsError> {
    if refresh {
        debug!("Refreshing session credentials");
        provider.refresh().await
    } else {
        provider.load().await
    }
}

/// Resolves once shutdown is signalled or the manager handle is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut outgoing: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    while let Some(frame) = outgoing.recv().await {
        let closing = matches!(frame, OutboundFrame::Close { .. });
        if let Err(e) = sink.send(frame).await {
            warn!("Failed to send frame: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

fn send_text(out: &mpsc::UnboundedSender<OutboundFrame>, text: String) {
    if out.send(OutboundFrame::Text(text)).is_err() {
        debug!("Writer closed, dropping outbound frame");
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

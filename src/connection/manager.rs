use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::request::ConnectionParams;
use super::state::{StateCell, WorkerStats};
use super::worker::{Command, ReconnectCause, Worker};
use crate::config::PullConfig;
use crate::dispatch::{event_channel, EventDispatcher, EventStream};
use crate::models::{Channel, ConnectionState, ConnectionStatus};
use crate::protocol::{Publication, RpcIdCounter};
use crate::subscription::SubscriptionRegistry;
use crate::traits::{CredentialProvider, PullConnector};

/// Name of the dedicated worker thread.
const WORKER_THREAD_NAME: &str = "pull-worker";

enum Runner {
    Idle,
    Thread(std::thread::JoinHandle<()>),
    Task(tokio::task::JoinHandle<()>),
    Stopped,
}

struct Control {
    runner: Runner,
    shutdown: Option<watch::Sender<bool>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    params: Option<ConnectionParams>,
}

/// Public handle of the pull client.
///
/// Owns the connection state machine. All methods take `&self` and may be
/// called from any thread; wrap the manager in an `Arc` to share it.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(connector, credentials, PullConfig::from_env());
/// let mut events = manager.events().expect("events taken once");
/// manager.start(channels, params);
/// while let Some(event) = events.blocking_recv() {
///     println!("{:?}", event.kind);
/// }
/// ```
pub struct ConnectionManager {
    connector: Arc<dyn PullConnector>,
    credentials: Arc<dyn CredentialProvider>,
    config: PullConfig,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<StateCell>,
    state_rx: watch::Receiver<ConnectionState>,
    stats: Arc<WorkerStats>,
    rpc_ids: RpcIdCounter,
    dispatcher: EventDispatcher,
    events: Mutex<Option<EventStream>>,
    statuses: Mutex<Option<mpsc::UnboundedReceiver<ConnectionStatus>>>,
    control: Mutex<Control>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn PullConnector>,
        credentials: Arc<dyn CredentialProvider>,
        config: PullConfig,
    ) -> Self {
        let (state, state_rx, status_rx) = StateCell::new();
        let (dispatcher, events) = event_channel(config.event_queue_capacity);
        Self {
            connector,
            credentials,
            config,
            registry: Arc::new(SubscriptionRegistry::new()),
            state: Arc::new(state),
            state_rx,
            stats: Arc::new(WorkerStats::default()),
            rpc_ids: RpcIdCounter::new(),
            dispatcher,
            events: Mutex::new(Some(events)),
            statuses: Mutex::new(Some(status_rx)),
            control: Mutex::new(Control {
                runner: Runner::Idle,
                shutdown: None,
                commands: None,
                params: None,
            }),
        }
    }

    /// Start connecting on a dedicated worker thread.
    ///
    /// Never fails: connect errors surface as state transitions. Calling it
    /// twice, or after [`stop`](Self::stop), is ignored.
    pub fn start(&self, channels: Vec<Channel>, params: ConnectionParams) {
        let mut control = self.control();
        let Some(worker) = self.prepare(&mut control, channels, params) else {
            return;
        };

        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build pull worker runtime: {}", e);
                        worker.abandon("runtime unavailable");
                        return;
                    }
                };
                runtime.block_on(worker.run());
            });

        match spawned {
            Ok(handle) => control.runner = Runner::Thread(handle),
            Err(e) => {
                error!("Failed to spawn pull worker thread: {}", e);
                control.runner = Runner::Stopped;
                self.state
                    .transition(ConnectionState::Closed, "worker thread unavailable");
                self.dispatcher.close();
            }
        }
    }

    /// Start the worker as a task on the current tokio runtime instead of a
    /// dedicated thread.
    pub fn start_in_runtime(&self, channels: Vec<Channel>, params: ConnectionParams) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("start_in_runtime called outside a tokio runtime: {}", e);
                return;
            }
        };

        let mut control = self.control();
        if let Some(worker) = self.prepare(&mut control, channels, params) {
            control.runner = Runner::Task(runtime.spawn(worker.run()));
        }
    }

    fn prepare(
        &self,
        control: &mut Control,
        channels: Vec<Channel>,
        params: ConnectionParams,
    ) -> Option<Worker> {
        if !matches!(control.runner, Runner::Idle) {
            warn!("Pull client already started or stopped, ignoring start()");
            return None;
        }
        if self.registry.set_channels(channels).is_err() {
            warn!("Channel set already configured, keeping the original");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        control.shutdown = Some(shutdown_tx);
        control.commands = Some(command_tx.clone());
        control.params = Some(params.clone());

        info!(
            "Starting pull client for user {} ({} channels)",
            params.user_id,
            self.registry.channels().len()
        );

        Some(Worker {
            connector: self.connector.clone(),
            credentials: self.credentials.clone(),
            config: self.config.clone(),
            params,
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            state: self.state.clone(),
            stats: self.stats.clone(),
            rpc_ids: self.rpc_ids.clone(),
            commands: command_rx,
            command_tx,
            shutdown: shutdown_rx,
        })
    }

    /// Stop the client, close the socket and wait for the worker thread.
    ///
    /// Idempotent. The state is `Closed` when this returns. For a worker
    /// started with [`start_in_runtime`](Self::start_in_runtime) the task is
    /// only signalled; use [`stop_async`](Self::stop_async) to wait for it.
    pub fn stop(&self) {
        match self.signal_stop() {
            Runner::Thread(handle) => {
                if handle.thread().id() == std::thread::current().id() {
                    warn!("stop() called from the pull worker thread, not joining");
                } else if handle.join().is_err() {
                    error!("Pull worker thread panicked");
                }
            }
            Runner::Task(_) | Runner::Idle | Runner::Stopped => {}
        }
        self.finish_stop();
    }

    /// Async variant of [`stop`](Self::stop) that also waits for a runtime task.
    pub async fn stop_async(&self) {
        match self.signal_stop() {
            Runner::Thread(handle) => {
                let joined = tokio::task::spawn_blocking(move || handle.join()).await;
                if !matches!(joined, Ok(Ok(()))) {
                    error!("Pull worker thread panicked");
                }
            }
            Runner::Task(handle) => {
                if let Err(e) = handle.await {
                    error!("Pull worker task failed: {}", e);
                }
            }
            Runner::Idle | Runner::Stopped => {}
        }
        self.finish_stop();
    }

    fn signal_stop(&self) -> Runner {
        let mut control = self.control();
        if let Some(shutdown) = &control.shutdown {
            debug!("Signalling pull worker shutdown");
            let _ = shutdown.send(true);
        }
        control.commands = None;
        std::mem::replace(&mut control.runner, Runner::Stopped)
    }

    fn finish_stop(&self) {
        self.state.transition(ConnectionState::Closed, "stopped");
        self.dispatcher.close();
    }

    /// The consumer's event stream. Returns `None` after the first call.
    pub fn events(&self) -> Option<EventStream> {
        lock(&self.events).take()
    }

    /// `(connected, reason)` notifications, one per state transition.
    /// Returns `None` after the first call.
    pub fn status_stream(&self) -> Option<mpsc::UnboundedReceiver<ConnectionStatus>> {
        lock(&self.statuses).take()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Watch channel following every state change.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Drop the current connection and reconnect. Returns false if the worker
    /// is not running.
    pub fn force_reconnect(&self) -> bool {
        self.send_command(Command::Reconnect {
            epoch: None,
            cause: ReconnectCause::Requested,
        })
    }

    /// Ask the server for online/offline updates of `user_id`.
    ///
    /// The watch list is re-announced after every reconnect.
    pub fn watch_user_status(&self, user_id: i64) {
        if self.registry.watch_user(user_id) {
            self.send_command(Command::UserStatus {
                user_id,
                subscribe: true,
            });
        }
    }

    pub fn unwatch_user_status(&self, user_id: i64) {
        if self.registry.unwatch_user(user_id) {
            self.send_command(Command::UserStatus {
                user_id,
                subscribe: false,
            });
        }
    }

    /// Publish to other subscribers of `publication.channels`.
    ///
    /// Returns false unless the connection is online; nothing is queued
    /// for later delivery.
    pub fn publish(&self, publication: Publication) -> bool {
        if !self.is_online() {
            debug!("Not online, dropping {} publication", publication.command);
            return false;
        }
        self.send_command(Command::Publish(publication))
    }

    pub fn send_typing(&self, chat_id: i64, typing: bool) -> bool {
        self.publish(Publication::typing(chat_id, typing))
    }

    fn send_command(&self, command: Command) -> bool {
        match &self.control().commands {
            Some(commands) => commands.send(command).is_ok(),
            None => false,
        }
    }

    /// Snapshot of the client for diagnostics.
    pub fn debug_info(&self) -> DebugInfo {
        let state = self.state();
        let control = self.control();
        let params = control.params.as_ref();
        let channel_id = self.registry.channel_id_param();

        DebugInfo {
            state,
            connected: state.is_online(),
            user_id: params.map(|p| p.user_id),
            site_id: params.map(|p| p.site_id.clone()),
            channel_id: (!channel_id.is_empty()).then(|| abbreviate(&channel_id, 20)),
            reconnect_attempt: self.stats.reconnect_attempt(),
            epoch: self.stats.epoch(),
            revision: self.stats.revision(),
            rpc_id: self.rpc_ids.current(),
            events_dispatched: self.dispatcher.dispatched_count(),
            events_dropped: self.dispatcher.dropped_count(),
            watched_users: self.registry.watched_users(),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        lock(&self.control)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(shutdown) = &self.control().shutdown {
            let _ = shutdown.send(true);
        }
    }
}

/// Serializable diagnostics snapshot returned by [`ConnectionManager::debug_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugInfo {
    pub state: ConnectionState,
    pub connected: bool,
    pub user_id: Option<i64>,
    pub site_id: Option<String>,
    /// First characters of the `CHANNEL_ID` parameter
    pub channel_id: Option<String>,
    pub reconnect_attempt: u32,
    pub epoch: u64,
    /// Server web revision, updated by `revision_changed` commands
    pub revision: i64,
    pub rpc_id: i64,
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub watched_users: Vec<i64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn abbreviate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

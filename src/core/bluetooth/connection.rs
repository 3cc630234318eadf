//! Per-device connection session: one owning task that drives the
//! lifecycle state machine, serializes GATT operations through the
//! queue, and fans completions out to listeners.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::auth;
use crate::core::bluetooth::constants::{UUID_PASSCODE_CHAR, UUID_SERIAL_NUMBER_CHAR};
use crate::core::bluetooth::error::WheelError;
use crate::core::bluetooth::platform::{BlePlatform, DeviceLink};
use crate::core::bluetooth::queue::{OperationId, OperationQueue};
use crate::core::bluetooth::types::{
    ConnectionState, DeviceHandle, ListenerSet, PendingOperation,
};
use crate::passcodes::PasscodeTable;

/// Requests a caller may direct at a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Disconnect,
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    EnableNotifications(Uuid),
}

/// Everything that can wake the session task
enum SessionEvent {
    Command(SessionCommand),
    OpFinished { id: OperationId, result: OpResult },
    LinkLost,
    Notified { uuid: Uuid, value: Vec<u8> },
}

type OpResult = Result<OpSuccess, WheelError>;

/// What a finished operation hands back to the session task
enum OpSuccess {
    Link(Arc<dyn DeviceLink>),
    LinkClosed,
    Characteristics(Vec<Uuid>),
    Value(Uuid, Vec<u8>),
    WriteAck(Uuid),
    Subscribed(Uuid, mpsc::UnboundedReceiver<Vec<u8>>),
}

/// Caller-side handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Sends a command; false when the session task has already ended
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(SessionEvent::Command(command)).is_ok()
    }

    /// Snapshot of the current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver for observing state changes as they happen
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// One device's lifecycle, owned by a single task.
///
/// All session state lives here and is touched only from `run`; the
/// outside world talks through [`SessionHandle`] and spawned subtasks
/// answer through the event channel.
pub struct DeviceSession {
    device: DeviceHandle,
    platform: Arc<dyn BlePlatform>,
    passcodes: Arc<PasscodeTable>,
    listeners: ListenerSet,
    connect_timeout: Duration,
    operation_timeout: Duration,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    queue: OperationQueue,
    link: Option<Arc<dyn DeviceLink>>,
    disconnect_requested: bool,
    shutdown: CancellationToken,
}

impl DeviceSession {
    /// Builds a session and its handle. Sessions are born Connecting;
    /// the watch only ever reads Disconnected once the session has
    /// ended.
    pub fn new(
        device: DeviceHandle,
        platform: Arc<dyn BlePlatform>,
        passcodes: Arc<PasscodeTable>,
        listeners: ListenerSet,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> (Self, SessionHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let handle = SessionHandle {
            commands: events_tx.clone(),
            state: state_rx,
        };
        let session = Self {
            device,
            platform,
            passcodes,
            listeners,
            connect_timeout,
            operation_timeout,
            events_tx,
            events_rx,
            state_tx,
            state: ConnectionState::Connecting,
            queue: OperationQueue::new(),
            link: None,
            disconnect_requested: false,
            shutdown: CancellationToken::new(),
        };
        (session, handle)
    }

    /// Drives the session until it reaches Disconnected.
    /// Starts the connection attempt immediately.
    pub async fn run(mut self) {
        info!("starting session for {}", self.device.display_name());
        self.enqueue(PendingOperation::Connect);

        while let Some(event) = self.events_rx.recv().await {
            match event {
                SessionEvent::Command(command) => self.handle_command(command),
                SessionEvent::OpFinished { id, result } => self.handle_completion(id, result),
                SessionEvent::LinkLost => self.handle_link_lost().await,
                SessionEvent::Notified { uuid, value } => self.handle_notification(uuid, value),
            }
            if matches!(self.state, ConnectionState::Disconnected) {
                break;
            }
        }

        self.shutdown.cancel();
        debug!("session for {} ended", self.device.display_name());
    }

    fn set_state(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(&next) {
            warn!(
                "{}: refusing state change {} -> {}",
                self.device.display_name(),
                self.state,
                next
            );
            return;
        }
        debug!("{}: {} -> {}", self.device.display_name(), self.state, next);
        self.state = next.clone();
        let _ = self.state_tx.send(next);
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Disconnect => self.handle_disconnect_request(),
            SessionCommand::Read(uuid) => {
                self.enqueue_if_ready(PendingOperation::ReadCharacteristic(uuid));
            }
            SessionCommand::Write(uuid, value) => {
                self.enqueue_if_ready(PendingOperation::WriteCharacteristic(uuid, value));
            }
            SessionCommand::EnableNotifications(uuid) => {
                self.enqueue_if_ready(PendingOperation::EnableNotifications(uuid));
            }
        }
    }

    /// Caller operations are gated on Ready; a state change can race
    /// the registry's own gate, so the session checks again.
    fn enqueue_if_ready(&mut self, op: PendingOperation) {
        if !self.state.is_ready() {
            warn!(
                "{}: dropping {} request in state {}",
                self.device.display_name(),
                op.kind(),
                self.state
            );
            self.listeners
                .broadcast(|l| l.on_error(&self.device, &WheelError::NotReady));
            return;
        }
        self.enqueue(op);
    }

    fn handle_disconnect_request(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Disconnected
                | ConnectionState::Disconnecting
                | ConnectionState::Failed(_)
        ) {
            debug!(
                "{}: disconnect requested while {}",
                self.device.display_name(),
                self.state
            );
            return;
        }
        info!("{}: disconnect requested", self.device.display_name());
        self.disconnect_requested = true;
        let dropped = self.queue.drain_waiting();
        if !dropped.is_empty() {
            debug!(
                "{}: dropping {} waiting operations",
                self.device.display_name(),
                dropped.len()
            );
        }
        self.set_state(ConnectionState::Disconnecting);
        // An in-flight operation is honored first; its completion
        // handler picks the teardown up.
        if self.queue.is_idle() {
            self.begin_teardown();
        }
    }

    fn enqueue(&mut self, op: PendingOperation) {
        if let Some((id, op)) = self.queue.enqueue(op) {
            self.dispatch(id, op);
        }
    }

    /// Runs the operation in a subtask bounded by the configured
    /// timeout; the subtask answers through the event channel.
    fn dispatch(&self, id: OperationId, op: PendingOperation) {
        debug!(
            "{}: dispatching {} as op {}",
            self.device.display_name(),
            op.kind(),
            id
        );
        let events = self.events_tx.clone();
        let platform = Arc::clone(&self.platform);
        let link = self.link.clone();
        let device_id = self.device.id.clone();
        let (limit, timeout_error) = if matches!(op, PendingOperation::Connect) {
            (self.connect_timeout, WheelError::ConnectTimeout)
        } else {
            (self.operation_timeout, WheelError::OperationTimeout)
        };
        tokio::spawn(async move {
            let result = match timeout(limit, execute(platform, link, device_id, op)).await {
                Ok(result) => result,
                Err(_) => Err(timeout_error),
            };
            let _ = events.send(SessionEvent::OpFinished { id, result });
        });
    }

    fn handle_completion(&mut self, id: OperationId, result: OpResult) {
        let Some(advance) = self.queue.complete(id) else {
            debug!(
                "{}: ignoring stale completion for op {}",
                self.device.display_name(),
                id
            );
            return;
        };

        // Teardown is terminal whatever the platform said
        if matches!(advance.finished, PendingOperation::Disconnect) {
            if let Err(error) = result {
                warn!(
                    "{}: platform disconnect reported {}",
                    self.device.display_name(),
                    error
                );
            }
            self.finish_disconnected();
            return;
        }

        match result {
            Ok(success) => self.operation_succeeded(success),
            Err(error) => self.operation_failed(advance.finished, error),
        }

        // A teardown begun above replaced the queue contents; only
        // dispatch the promoted head while it is still current.
        if let Some((next_id, next_op)) = advance.dispatch {
            if self.queue.in_flight().map(|(current, _)| *current) == Some(next_id) {
                self.dispatch(next_id, next_op);
            }
        }
    }

    fn operation_succeeded(&mut self, success: OpSuccess) {
        match success {
            OpSuccess::Link(link) => {
                if self.device.name.is_none() {
                    self.device.name = link.display_name();
                }
                info!("{}: connected", self.device.display_name());
                self.link = Some(Arc::clone(&link));
                if self.disconnect_requested {
                    self.begin_teardown();
                    return;
                }
                self.spawn_link_watcher(link);
                self.set_state(ConnectionState::DiscoveringServices);
                self.enqueue(PendingOperation::DiscoverServices);
            }
            OpSuccess::Characteristics(uuids) => {
                debug!(
                    "{}: {} characteristics discovered",
                    self.device.display_name(),
                    uuids.len()
                );
                if self.disconnect_requested {
                    self.begin_teardown();
                    return;
                }
                for required in [UUID_SERIAL_NUMBER_CHAR, UUID_PASSCODE_CHAR] {
                    if !uuids.contains(&required) {
                        self.setup_failed(WheelError::CharacteristicNotFound(required));
                        return;
                    }
                }
                self.set_state(ConnectionState::Authenticating);
                self.enqueue(PendingOperation::ReadCharacteristic(UUID_SERIAL_NUMBER_CHAR));
            }
            OpSuccess::Value(uuid, value) => {
                self.listeners
                    .broadcast(|l| l.on_characteristic_read(&self.device, uuid, &value));
                if self.disconnect_requested {
                    self.begin_teardown();
                    return;
                }
                if matches!(self.state, ConnectionState::Authenticating)
                    && uuid == UUID_SERIAL_NUMBER_CHAR
                {
                    match auth::passcode_for_serial(&self.passcodes, &value) {
                        Ok(passcode) => {
                            self.enqueue(PendingOperation::WriteCharacteristic(
                                UUID_PASSCODE_CHAR,
                                passcode,
                            ));
                        }
                        Err(error) => self.setup_failed(error),
                    }
                }
            }
            OpSuccess::WriteAck(uuid) => {
                self.listeners
                    .broadcast(|l| l.on_characteristic_write(&self.device, uuid));
                if self.disconnect_requested {
                    self.begin_teardown();
                    return;
                }
                if matches!(self.state, ConnectionState::Authenticating)
                    && uuid == UUID_PASSCODE_CHAR
                {
                    info!("{}: authenticated, ready", self.device.display_name());
                    self.set_state(ConnectionState::Ready);
                    self.listeners
                        .broadcast(|l| l.on_setup_complete(&self.device));
                }
            }
            OpSuccess::Subscribed(uuid, values) => {
                if self.disconnect_requested {
                    self.begin_teardown();
                    return;
                }
                debug!(
                    "{}: notifications enabled on {}",
                    self.device.display_name(),
                    uuid
                );
                self.spawn_notification_pump(uuid, values);
            }
            // Disconnect completions are short-circuited before this match
            OpSuccess::LinkClosed => {}
        }
    }

    fn operation_failed(&mut self, finished: PendingOperation, error: WheelError) {
        if self.disconnect_requested {
            debug!(
                "{}: {} failed during teardown: {}",
                self.device.display_name(),
                finished.kind(),
                error
            );
            self.begin_teardown();
            return;
        }
        if matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::Authenticating
        ) {
            self.setup_failed(error);
            return;
        }
        if self.state.is_ready() {
            warn!(
                "{}: {} failed: {}",
                self.device.display_name(),
                finished.kind(),
                error
            );
            self.listeners.broadcast(|l| l.on_error(&self.device, &error));
            return;
        }
        warn!(
            "{}: {} failed in state {}: {}",
            self.device.display_name(),
            finished.kind(),
            self.state,
            error
        );
    }

    /// A failure before Ready ends the whole attempt: Failed is
    /// published, then teardown runs and lands in Disconnected.
    fn setup_failed(&mut self, error: WheelError) {
        error!(
            "{}: connection attempt failed: {}",
            self.device.display_name(),
            error
        );
        self.set_state(ConnectionState::Failed(error.clone()));
        self.listeners.broadcast(|l| l.on_error(&self.device, &error));
        self.begin_teardown();
    }

    /// Replaces whatever the queue holds with a single Disconnect.
    /// Only called at completion boundaries or with an idle queue, so
    /// no dispatched subtask holds the slot being revoked.
    fn begin_teardown(&mut self) {
        let abandoned = self.queue.clear();
        if !abandoned.is_empty() {
            debug!(
                "{}: abandoning {} queued operations",
                self.device.display_name(),
                abandoned.len()
            );
        }
        self.enqueue(PendingOperation::Disconnect);
    }

    fn finish_disconnected(&mut self) {
        self.link = None;
        self.set_state(ConnectionState::Disconnected);
        info!("{}: disconnected", self.device.display_name());
        self.listeners.broadcast(|l| l.on_disconnect(&self.device));
    }

    async fn handle_link_lost(&mut self) {
        if matches!(self.state, ConnectionState::Disconnected) {
            return;
        }
        warn!("{}: link lost", self.device.display_name());
        let dropped = self.queue.clear();
        if !dropped.is_empty() {
            debug!(
                "{}: dropping {} queued operations",
                self.device.display_name(),
                dropped.len()
            );
        }
        if let Some(link) = self.link.take() {
            // Best effort; the link is usually already gone
            match timeout(self.operation_timeout, link.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => debug!(
                    "{}: post-loss disconnect reported {}",
                    self.device.display_name(),
                    error
                ),
                Err(_) => debug!(
                    "{}: post-loss disconnect timed out",
                    self.device.display_name()
                ),
            }
        }
        self.set_state(ConnectionState::Disconnected);
        self.listeners.broadcast(|l| l.on_disconnect(&self.device));
    }

    fn handle_notification(&self, uuid: Uuid, value: Vec<u8>) {
        debug!(
            "{}: notification on {} ({} bytes)",
            self.device.display_name(),
            uuid,
            value.len()
        );
        self.listeners
            .broadcast(|l| l.on_characteristic_changed(&self.device, uuid, &value));
    }

    fn spawn_link_watcher(&self, link: Arc<dyn DeviceLink>) {
        let events = self.events_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = link.link_lost() => {
                    let _ = events.send(SessionEvent::LinkLost);
                }
            }
        });
    }

    fn spawn_notification_pump(&self, uuid: Uuid, mut values: mpsc::UnboundedReceiver<Vec<u8>>) {
        let events = self.events_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    value = values.recv() => match value {
                        Some(value) => {
                            if events.send(SessionEvent::Notified { uuid, value }).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }
}

async fn execute(
    platform: Arc<dyn BlePlatform>,
    link: Option<Arc<dyn DeviceLink>>,
    device_id: String,
    op: PendingOperation,
) -> OpResult {
    match op {
        PendingOperation::Connect => {
            let link = platform.connect(&device_id).await?;
            Ok(OpSuccess::Link(link))
        }
        PendingOperation::Disconnect => {
            if let Some(link) = link {
                link.disconnect().await?;
            }
            Ok(OpSuccess::LinkClosed)
        }
        PendingOperation::DiscoverServices => {
            let link = link.ok_or(WheelError::NotConnected)?;
            Ok(OpSuccess::Characteristics(
                link.discover_characteristics().await?,
            ))
        }
        PendingOperation::ReadCharacteristic(uuid) => {
            let link = link.ok_or(WheelError::NotConnected)?;
            Ok(OpSuccess::Value(uuid, link.read(uuid).await?))
        }
        PendingOperation::WriteCharacteristic(uuid, value) => {
            let link = link.ok_or(WheelError::NotConnected)?;
            link.write(uuid, &value).await?;
            Ok(OpSuccess::WriteAck(uuid))
        }
        PendingOperation::EnableNotifications(uuid) => {
            let link = link.ok_or(WheelError::NotConnected)?;
            let values = link.subscribe(uuid).await?;
            Ok(OpSuccess::Subscribed(uuid, values))
        }
    }
}

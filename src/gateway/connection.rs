use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    common::{
        errors::ConnectionError,
        types::{ChannelId, ConnectionId, GuildId},
    },
    configs::VoiceConfig,
    gateway::{
        adapter::{GatewayPayload, SignalingAdapter, VoiceServerUpdate, VoiceStateUpdate},
        constants::CONNECTION_EVENT_CAPACITY,
        state::{ConnectionInput, ConnectionState, Intent, VoiceConnectionStatus, transition},
    },
    room::{MediaRoom, RoomConnector, RoomEvent},
};

/// Receives a connection's lifecycle callbacks. Implemented by the audio
/// player.
///
/// Callbacks run synchronously on the thread driving the connection and
/// must not block.
pub trait ConnectionSubscriber: Send + Sync {
    fn on_subscribed(&self, connection: ConnectionId);
    fn on_unsubscribed(&self, connection: ConnectionId);
    fn on_connection_ready(&self, connection: ConnectionId, room: Arc<dyn MediaRoom>);
    fn on_connection_lost(&self, connection: ConnectionId);
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChange {
        from: VoiceConnectionStatus,
        to: VoiceConnectionStatus,
    },
    Error(ConnectionError),
}

enum RoomCommand {
    Connect {
        attempt: u64,
        endpoint: String,
        token: String,
        room: Option<String>,
    },
    Teardown,
    Shutdown,
}

struct Inner {
    id: ConnectionId,
    guild_id: GuildId,
    voice: VoiceConfig,
    adapter: Arc<dyn SignalingAdapter>,
    adapter_destroyed: AtomicBool,
    /// Serialises transitions together with their side effects. Reentrant so
    /// a subscriber callback may query or drive the connection.
    dispatch: ReentrantMutex<()>,
    state: Mutex<ConnectionState>,
    subscriber: Mutex<Option<Arc<dyn ConnectionSubscriber>>>,
    room: Mutex<Option<Arc<dyn MediaRoom>>>,
    /// Unbounded: every connect and teardown must reach the worker, which
    /// skips superseded attempts itself.
    room_tx: flume::Sender<RoomCommand>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// One guild's voice session: the join handshake plus the media room link.
///
/// Cheap to clone; all clones drive the same session. Must be created
/// inside a tokio runtime.
#[derive(Clone)]
pub struct VoiceConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for VoiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceConnection")
            .field("id", &self.inner.id)
            .field("guild_id", &self.inner.guild_id)
            .field("status", &self.status())
            .finish()
    }
}

impl VoiceConnection {
    /// Creates the connection in `Connecting` and sends the join request.
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        voice: VoiceConfig,
        adapter: Arc<dyn SignalingAdapter>,
        connector: Arc<dyn RoomConnector>,
    ) -> Self {
        let (room_tx, room_rx) = flume::unbounded();
        let (events, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            id: ConnectionId::generate(),
            guild_id: guild_id.clone(),
            voice,
            adapter,
            adapter_destroyed: AtomicBool::new(false),
            dispatch: ReentrantMutex::new(()),
            state: Mutex::new(ConnectionState::new(guild_id, channel_id)),
            subscriber: Mutex::new(None),
            room: Mutex::new(None),
            room_tx,
            events,
        });

        tokio::spawn(room_worker(Arc::downgrade(&inner), connector, room_rx));

        let connection = Self { inner };
        let channel_id = connection.channel_id();
        debug!(
            "[{}] Requesting join of channel {}",
            connection.inner.guild_id, channel_id
        );
        connection.send_voice_state(Some(&channel_id), "join");
        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.inner.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.inner.state.lock().session.channel_id.clone()
    }

    pub fn status(&self) -> VoiceConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    /// The joined media room while `Ready`.
    pub fn room(&self) -> Option<Arc<dyn MediaRoom>> {
        self.inner.room.lock().clone()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn has_subscriber(&self) -> bool {
        self.inner.subscriber.lock().is_some()
    }

    /// Binds `subscriber`, unsubscribing any previous one first. A ready
    /// connection notifies the new subscriber immediately.
    ///
    /// Returns `false` on a destroyed connection.
    pub fn subscribe(&self, subscriber: impl ConnectionSubscriber + 'static) -> bool {
        let _guard = self.inner.dispatch.lock();
        if self.status() == VoiceConnectionStatus::Destroyed {
            return false;
        }

        let subscriber: Arc<dyn ConnectionSubscriber> = Arc::new(subscriber);
        let previous = self.inner.subscriber.lock().replace(subscriber.clone());
        if let Some(previous) = previous {
            previous.on_unsubscribed(self.inner.id);
        }
        subscriber.on_subscribed(self.inner.id);

        if self.status() == VoiceConnectionStatus::Ready {
            if let Some(room) = self.room() {
                subscriber.on_connection_ready(self.inner.id, room);
            }
        }
        true
    }

    /// Detaches the current subscriber. Returns `false` if there was none.
    pub fn unsubscribe(&self) -> bool {
        let _guard = self.inner.dispatch.lock();
        let previous = self.inner.subscriber.lock().take();
        match previous {
            Some(previous) => {
                previous.on_unsubscribed(self.inner.id);
                true
            }
            None => false,
        }
    }

    /// Leaves the voice channel but keeps the connection reusable through
    /// [`rejoin`](Self::rejoin).
    pub fn disconnect(&self) -> bool {
        let _guard = self.inner.dispatch.lock();
        if !matches!(
            self.status(),
            VoiceConnectionStatus::Connecting
                | VoiceConnectionStatus::Signalling
                | VoiceConnectionStatus::Ready
        ) {
            return false;
        }
        if !self.send_voice_state(None, "leave") {
            return false;
        }
        self.apply(ConnectionInput::Disconnect);
        true
    }

    /// Re-sends the join request. From `Disconnected` this returns the
    /// connection to `Connecting`; live connections only re-signal.
    pub fn rejoin(&self) -> bool {
        let _guard = self.inner.dispatch.lock();
        if self.status() == VoiceConnectionStatus::Destroyed {
            return false;
        }
        let channel_id = self.channel_id();
        if !self.send_voice_state(Some(&channel_id), "rejoin") {
            return false;
        }
        self.apply(ConnectionInput::Rejoin);
        true
    }

    /// Full teardown. Safe to call any number of times.
    pub fn destroy(&self) {
        let _guard = self.inner.dispatch.lock();
        let status = self.status();
        if status == VoiceConnectionStatus::Destroyed {
            return;
        }

        if status != VoiceConnectionStatus::Disconnected {
            let payload = GatewayPayload::voice_state(
                &self.inner.guild_id,
                None,
                self.inner.voice.self_mute,
                self.inner.voice.self_deaf,
            );
            if !self.inner.adapter.send_payload(&payload) {
                debug!(
                    "[{}] Leave payload not delivered during destroy",
                    self.inner.guild_id
                );
            }
        }

        self.apply(ConnectionInput::Destroy);
        self.send_room_command(RoomCommand::Shutdown);
    }

    pub fn on_voice_server_update(&self, update: VoiceServerUpdate) {
        if update.endpoint.is_none() {
            debug!(
                "[{}] Voice server update without endpoint; waiting for reallocation",
                self.inner.guild_id
            );
        }
        self.apply(ConnectionInput::VoiceServer(update));
    }

    pub fn on_voice_state_update(&self, update: VoiceStateUpdate) {
        if update.guild_id != self.inner.guild_id {
            warn!(
                "[{}] Ignoring voice state update for guild {}",
                self.inner.guild_id, update.guild_id
            );
            return;
        }
        self.apply(ConnectionInput::VoiceState(update));
    }

    fn send_voice_state(&self, channel_id: Option<&ChannelId>, action: &'static str) -> bool {
        let payload = GatewayPayload::voice_state(
            &self.inner.guild_id,
            channel_id,
            self.inner.voice.self_mute,
            self.inner.voice.self_deaf,
        );
        if self.inner.adapter.send_payload(&payload) {
            return true;
        }
        let error = ConnectionError::SignalingAdapter {
            guild_id: self.inner.guild_id.clone(),
            action,
        };
        warn!("{}", error);
        let _ = self.inner.events.send(ConnectionEvent::Error(error));
        false
    }

    /// Runs one transition and dispatches its intents. Returns whether the
    /// status changed.
    fn apply(&self, input: ConnectionInput) -> bool {
        let _guard = self.inner.dispatch.lock();

        let (from, to, intents) = {
            let mut state = self.inner.state.lock();
            let from = state.status;
            let next = transition(&state, input);
            *state = next.state;
            (from, state.status, next.intents)
        };

        if from != to {
            info!("[{}] Voice connection {} -> {}", self.inner.guild_id, from, to);
            let _ = self
                .inner
                .events
                .send(ConnectionEvent::StateChange { from, to });
        }

        for intent in intents {
            self.dispatch(intent);
        }
        from != to
    }

    fn dispatch(&self, intent: Intent) {
        let id = self.inner.id;
        match intent {
            Intent::ConnectRoom {
                attempt,
                endpoint,
                token,
                room,
            } => {
                debug!(
                    "[{}] Connecting to media room at {} (attempt {})",
                    self.inner.guild_id, endpoint, attempt
                );
                self.send_room_command(RoomCommand::Connect {
                    attempt,
                    endpoint,
                    token,
                    room,
                });
            }
            Intent::TeardownRoom => {
                self.inner.room.lock().take();
                self.send_room_command(RoomCommand::Teardown);
            }
            Intent::NotifyReady => {
                let subscriber = self.inner.subscriber.lock().clone();
                let room = self.room();
                if let (Some(subscriber), Some(room)) = (subscriber, room) {
                    subscriber.on_connection_ready(id, room);
                }
            }
            Intent::NotifyLost => {
                let subscriber = self.inner.subscriber.lock().clone();
                if let Some(subscriber) = subscriber {
                    subscriber.on_connection_lost(id);
                }
            }
            Intent::EmitError(kind) => {
                let error = kind.into_error(self.inner.guild_id.clone());
                warn!("{}", error);
                let _ = self.inner.events.send(ConnectionEvent::Error(error));
            }
            Intent::UnsubscribePlayer => {
                let previous = self.inner.subscriber.lock().take();
                if let Some(previous) = previous {
                    previous.on_unsubscribed(id);
                }
            }
            Intent::DestroyAdapter => {
                if !self.inner.adapter_destroyed.swap(true, Ordering::AcqRel) {
                    self.inner.adapter.destroy();
                }
            }
        }
    }

    fn send_room_command(&self, command: RoomCommand) {
        if self.inner.room_tx.send(command).is_err() {
            warn!("[{}] Room worker is gone; command dropped", self.inner.guild_id);
        }
    }

    /// Called by the room worker. Publishes the room and moves to `Ready`
    /// when `attempt` is still the wanted one.
    fn accept_room(&self, attempt: u64, room: Arc<dyn MediaRoom>) -> bool {
        let _guard = self.inner.dispatch.lock();
        {
            let state = self.inner.state.lock();
            if state.status != VoiceConnectionStatus::Signalling || state.attempt != attempt {
                return false;
            }
        }
        *self.inner.room.lock() = Some(room);
        self.apply(ConnectionInput::RoomConnected { attempt })
    }
}

struct ActiveLink {
    attempt: u64,
    room: Arc<dyn MediaRoom>,
    events: flume::Receiver<RoomEvent>,
}

async fn release(link: &mut Option<ActiveLink>) {
    if let Some(link) = link.take() {
        link.room.disconnect().await;
    }
}

async fn next_room_event(link: &Option<ActiveLink>) -> Option<RoomEvent> {
    match link {
        Some(link) => link.events.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

/// Owns the media room link. Connect attempts and teardowns are handled one
/// at a time; a command arriving mid-connect abandons that attempt.
async fn room_worker(
    weak: Weak<Inner>,
    connector: Arc<dyn RoomConnector>,
    commands: flume::Receiver<RoomCommand>,
) {
    let mut link: Option<ActiveLink> = None;
    let mut pending: Option<RoomCommand> = None;

    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => tokio::select! {
                command = commands.recv_async() => match command {
                    Ok(command) => command,
                    Err(_) => break,
                },
                event = next_room_event(&link) => {
                    let attempt = link.as_ref().map(|l| l.attempt).unwrap_or_default();
                    let reason = match event {
                        Some(RoomEvent::Disconnected { reason }) => reason,
                        None => "room event stream closed".to_string(),
                    };
                    release(&mut link).await;
                    let Some(inner) = weak.upgrade() else { break };
                    let connection = VoiceConnection { inner };
                    debug!("[{}] Media room disconnected: {}", connection.guild_id(), reason);
                    connection.apply(ConnectionInput::RoomDisconnected { attempt, reason });
                    continue;
                }
            },
        };

        match command {
            RoomCommand::Shutdown => break,
            RoomCommand::Teardown => release(&mut link).await,
            RoomCommand::Connect {
                attempt,
                endpoint,
                token,
                room,
            } => {
                release(&mut link).await;

                let result = tokio::select! {
                    result = connector.connect(&endpoint, &token, room.as_deref()) => result,
                    command = commands.recv_async() => {
                        pending = command.ok();
                        continue;
                    }
                };

                let Some(inner) = weak.upgrade() else {
                    if let Ok(joined) = result {
                        joined.room.disconnect().await;
                    }
                    break;
                };
                let connection = VoiceConnection { inner };

                match result {
                    Ok(joined) => {
                        if connection.accept_room(attempt, joined.room.clone()) {
                            link = Some(ActiveLink {
                                attempt,
                                room: joined.room,
                                events: joined.events,
                            });
                        } else {
                            debug!(
                                "[{}] Discarding superseded room connect (attempt {})",
                                connection.guild_id(),
                                attempt
                            );
                            joined.room.disconnect().await;
                        }
                    }
                    Err(e) => {
                        connection.apply(ConnectionInput::RoomConnectFailed {
                            attempt,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    release(&mut link).await;
}

//! Pure signaling state machine.
//!
//! [`transition`] never performs I/O. It returns the next state plus the
//! side effects the connection must carry out, in order.

use serde::Serialize;

use crate::{
    common::{
        errors::ConnectionError,
        types::{ChannelId, GuildId},
    },
    gateway::adapter::{VoiceServerUpdate, VoiceStateUpdate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceConnectionStatus {
    /// Join requested, waiting for voice-server credentials.
    Connecting,
    /// Credentials received, media room connect in flight.
    Signalling,
    Ready,
    Disconnected,
    Destroyed,
}

impl VoiceConnectionStatus {
    /// The room link may be up or being established.
    fn has_room(self) -> bool {
        matches!(self, Self::Signalling | Self::Ready)
    }

    fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Signalling | Self::Ready)
    }
}

impl std::fmt::Display for VoiceConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingSession {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub room: Option<String>,
}

impl SignalingSession {
    pub fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            guild_id,
            channel_id,
            endpoint: None,
            token: None,
            room: None,
        }
    }

    fn clear_credentials(&mut self) {
        self.endpoint = None;
        self.token = None;
        self.room = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: VoiceConnectionStatus,
    pub session: SignalingSession,
    /// Number of the room connect attempt whose result is still wanted.
    /// Bumped whenever an attempt is started or abandoned.
    pub attempt: u64,
}

impl ConnectionState {
    pub fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            status: VoiceConnectionStatus::Connecting,
            session: SignalingSession::new(guild_id, channel_id),
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionInput {
    VoiceServer(VoiceServerUpdate),
    VoiceState(VoiceStateUpdate),
    RoomConnected { attempt: u64 },
    RoomConnectFailed { attempt: u64, reason: String },
    RoomDisconnected { attempt: u64, reason: String },
    /// The leave payload was accepted by the adapter.
    Disconnect,
    /// The join payload was accepted by the adapter.
    Rejoin,
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    ConnectRoom {
        attempt: u64,
        endpoint: String,
        token: String,
        room: Option<String>,
    },
    TeardownRoom,
    NotifyReady,
    NotifyLost,
    EmitError(ConnectionErrorKind),
    UnsubscribePlayer,
    DestroyAdapter,
}

/// Error intents carry only what the pure layer knows; the shell turns them
/// into [`ConnectionError`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    MediaRoomConnect { endpoint: String, reason: String },
}

impl ConnectionErrorKind {
    pub fn into_error(self, guild_id: GuildId) -> ConnectionError {
        match self {
            Self::MediaRoomConnect { endpoint, reason } => ConnectionError::MediaRoomConnect {
                guild_id,
                endpoint,
                reason,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ConnectionState,
    pub intents: Vec<Intent>,
}

impl Transition {
    fn unchanged(state: &ConnectionState) -> Self {
        Self {
            state: state.clone(),
            intents: Vec::new(),
        }
    }
}

pub fn transition(state: &ConnectionState, input: ConnectionInput) -> Transition {
    use VoiceConnectionStatus::*;

    if state.status == Destroyed {
        return Transition::unchanged(state);
    }

    let mut next = state.clone();
    let mut intents = Vec::new();

    match input {
        ConnectionInput::VoiceServer(update) => {
            if !state.status.is_live() {
                return Transition::unchanged(state);
            }
            let Some(endpoint) = update.endpoint else {
                return Transition::unchanged(state);
            };
            if state.status.has_room() {
                intents.push(Intent::TeardownRoom);
            }
            if state.status == Ready {
                intents.push(Intent::NotifyLost);
            }
            next.attempt += 1;
            next.status = Signalling;
            next.session.endpoint = Some(endpoint.clone());
            next.session.token = Some(update.token.clone());
            next.session.room = update.room.clone();
            intents.push(Intent::ConnectRoom {
                attempt: next.attempt,
                endpoint,
                token: update.token,
                room: update.room,
            });
        }

        ConnectionInput::VoiceState(update) => match update.channel_id {
            None => {
                if !state.status.is_live() {
                    return Transition::unchanged(state);
                }
                leave(state, &mut next, &mut intents);
            }
            Some(channel_id) => {
                if channel_id == state.session.channel_id {
                    return Transition::unchanged(state);
                }
                next.session.channel_id = channel_id;
            }
        },

        ConnectionInput::RoomConnected { attempt } => {
            if state.status != Signalling || attempt != state.attempt {
                return Transition::unchanged(state);
            }
            next.status = Ready;
            intents.push(Intent::NotifyReady);
        }

        ConnectionInput::RoomConnectFailed { attempt, reason } => {
            if state.status != Signalling || attempt != state.attempt {
                return Transition::unchanged(state);
            }
            next.status = Disconnected;
            next.attempt += 1;
            intents.push(Intent::TeardownRoom);
            intents.push(Intent::EmitError(ConnectionErrorKind::MediaRoomConnect {
                endpoint: state.session.endpoint.clone().unwrap_or_default(),
                reason,
            }));
        }

        ConnectionInput::RoomDisconnected { attempt, .. } => {
            if state.status != Ready || attempt != state.attempt {
                return Transition::unchanged(state);
            }
            next.status = Disconnected;
            next.attempt += 1;
            intents.push(Intent::TeardownRoom);
            intents.push(Intent::NotifyLost);
        }

        ConnectionInput::Disconnect => {
            if !state.status.is_live() {
                return Transition::unchanged(state);
            }
            leave(state, &mut next, &mut intents);
        }

        ConnectionInput::Rejoin => {
            if state.status != Disconnected {
                return Transition::unchanged(state);
            }
            next.status = Connecting;
            next.attempt += 1;
            next.session.clear_credentials();
        }

        ConnectionInput::Destroy => {
            next.status = Destroyed;
            next.attempt += 1;
            next.session.clear_credentials();
            intents.push(Intent::UnsubscribePlayer);
            if state.status.has_room() {
                intents.push(Intent::TeardownRoom);
            }
            intents.push(Intent::DestroyAdapter);
        }
    }

    Transition {
        state: next,
        intents,
    }
}

fn leave(state: &ConnectionState, next: &mut ConnectionState, intents: &mut Vec<Intent>) {
    if state.status.has_room() {
        intents.push(Intent::TeardownRoom);
    }
    if state.status == VoiceConnectionStatus::Ready {
        intents.push(Intent::NotifyLost);
    }
    next.status = VoiceConnectionStatus::Disconnected;
    next.attempt += 1;
    next.session.clear_credentials();
}

#[cfg(test)]
mod tests {
    use super::*;
    use VoiceConnectionStatus::*;

    fn fresh() -> ConnectionState {
        ConnectionState::new("g".into(), "c".into())
    }

    fn server(endpoint: &str) -> ConnectionInput {
        ConnectionInput::VoiceServer(VoiceServerUpdate {
            token: "t".into(),
            endpoint: Some(endpoint.into()),
            room: Some("r".into()),
        })
    }

    fn voice_state(channel: Option<&str>) -> ConnectionInput {
        ConnectionInput::VoiceState(VoiceStateUpdate {
            guild_id: "g".into(),
            channel_id: channel.map(ChannelId::from),
            user_id: "u".into(),
            self_mute: false,
            self_deaf: false,
        })
    }

    fn run(state: &ConnectionState, inputs: impl IntoIterator<Item = ConnectionInput>) -> ConnectionState {
        inputs
            .into_iter()
            .fold(state.clone(), |s, input| transition(&s, input).state)
    }

    #[test]
    fn voice_server_starts_one_connect() {
        let t = transition(&fresh(), server("e"));

        assert_eq!(t.state.status, Signalling);
        assert_eq!(t.state.session.token.as_deref(), Some("t"));
        assert_eq!(
            t.intents,
            vec![Intent::ConnectRoom {
                attempt: 1,
                endpoint: "e".into(),
                token: "t".into(),
                room: Some("r".into()),
            }]
        );
    }

    #[test]
    fn null_endpoint_waits_for_reallocation() {
        let input = ConnectionInput::VoiceServer(VoiceServerUpdate {
            token: "t".into(),
            endpoint: None,
            room: None,
        });
        let t = transition(&fresh(), input);
        assert_eq!(t.state, fresh());
        assert!(t.intents.is_empty());
    }

    #[test]
    fn second_voice_server_tears_down_before_connecting() {
        let ready = run(&fresh(), [server("e"), ConnectionInput::RoomConnected { attempt: 1 }]);
        assert_eq!(ready.status, Ready);

        let t = transition(&ready, server("e2"));
        assert_eq!(t.state.status, Signalling);
        assert_eq!(t.intents[0], Intent::TeardownRoom);
        assert_eq!(t.intents[1], Intent::NotifyLost);
        assert!(matches!(t.intents[2], Intent::ConnectRoom { attempt: 2, .. }));
    }

    #[test]
    fn stale_connect_results_are_ignored() {
        let twice = run(&fresh(), [server("e"), server("e2")]);
        assert_eq!(twice.attempt, 2);

        let t = transition(&twice, ConnectionInput::RoomConnected { attempt: 1 });
        assert_eq!(t.state.status, Signalling);
        assert!(t.intents.is_empty());

        let t = transition(&twice, ConnectionInput::RoomConnected { attempt: 2 });
        assert_eq!(t.state.status, Ready);
        assert_eq!(t.intents, vec![Intent::NotifyReady]);
    }

    #[test]
    fn connect_failure_disconnects_and_reports() {
        let signalling = run(&fresh(), [server("e")]);
        let t = transition(
            &signalling,
            ConnectionInput::RoomConnectFailed {
                attempt: 1,
                reason: "refused".into(),
            },
        );

        assert_eq!(t.state.status, Disconnected);
        assert!(t.intents.contains(&Intent::EmitError(
            ConnectionErrorKind::MediaRoomConnect {
                endpoint: "e".into(),
                reason: "refused".into(),
            }
        )));
        assert!(!t.intents.iter().any(|i| matches!(i, Intent::ConnectRoom { .. })));
    }

    #[test]
    fn null_channel_from_ready_notifies_lost() {
        let ready = run(&fresh(), [server("e"), ConnectionInput::RoomConnected { attempt: 1 }]);
        let t = transition(&ready, voice_state(None));

        assert_eq!(t.state.status, Disconnected);
        assert_eq!(t.intents, vec![Intent::TeardownRoom, Intent::NotifyLost]);
        assert!(t.state.session.token.is_none());
    }

    #[test]
    fn channel_move_updates_session_only() {
        let ready = run(&fresh(), [server("e"), ConnectionInput::RoomConnected { attempt: 1 }]);
        let t = transition(&ready, voice_state(Some("other")));

        assert_eq!(t.state.status, Ready);
        assert_eq!(t.state.session.channel_id, ChannelId::from("other"));
        assert!(t.intents.is_empty());
    }

    #[test]
    fn room_disconnect_from_ready() {
        let ready = run(&fresh(), [server("e"), ConnectionInput::RoomConnected { attempt: 1 }]);
        let t = transition(
            &ready,
            ConnectionInput::RoomDisconnected {
                attempt: 1,
                reason: "kicked".into(),
            },
        );
        assert_eq!(t.state.status, Disconnected);
        assert_eq!(t.intents, vec![Intent::TeardownRoom, Intent::NotifyLost]);
    }

    #[test]
    fn rejoin_only_from_disconnected() {
        let t = transition(&fresh(), ConnectionInput::Rejoin);
        assert_eq!(t.state.status, Connecting);
        assert_eq!(t.state.attempt, 0);

        let gone = run(&fresh(), [server("e"), ConnectionInput::Disconnect]);
        assert_eq!(gone.status, Disconnected);

        let t = transition(&gone, ConnectionInput::Rejoin);
        assert_eq!(t.state.status, Connecting);
        assert!(t.state.session.endpoint.is_none());
    }

    #[test]
    fn destroy_is_terminal() {
        let ready = run(&fresh(), [server("e"), ConnectionInput::RoomConnected { attempt: 1 }]);
        let t = transition(&ready, ConnectionInput::Destroy);

        assert_eq!(t.state.status, Destroyed);
        assert_eq!(
            t.intents,
            vec![
                Intent::UnsubscribePlayer,
                Intent::TeardownRoom,
                Intent::DestroyAdapter
            ]
        );

        for input in [
            server("e"),
            ConnectionInput::Rejoin,
            ConnectionInput::Destroy,
            voice_state(None),
        ] {
            let again = transition(&t.state, input);
            assert_eq!(again.state.status, Destroyed);
            assert!(again.intents.is_empty());
        }
    }
}

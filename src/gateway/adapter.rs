use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    common::types::{ChannelId, GuildId, UserId},
    gateway::constants::VOICE_STATE_UPDATE_OP,
};

/// Transport a voice connection signals through.
///
/// Implemented by whatever owns the gateway socket. `send_payload` returns
/// `false` when the payload could not be queued (socket closed, shard gone).
pub trait SignalingAdapter: Send + Sync + 'static {
    fn send_payload(&self, payload: &GatewayPayload) -> bool;

    /// Releases the adapter's hold on this guild. Called at most once.
    fn destroy(&self);
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Value,
}

impl GatewayPayload {
    /// Op 4. A `None` channel asks the gateway to leave voice.
    pub fn voice_state(
        guild_id: &GuildId,
        channel_id: Option<&ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Self {
        Self {
            op: VOICE_STATE_UPDATE_OP,
            d: json!({
                "guild_id": guild_id,
                "channel_id": channel_id,
                "self_mute": self_mute,
                "self_deaf": self_deaf,
            }),
        }
    }
}

/// Credentials handed out by the gateway after a join request.
///
/// `endpoint` is null while the voice server is being reallocated.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
}

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::info;

use crate::{
    common::types::{ChannelId, GuildId},
    configs::VoiceConfig,
    gateway::{SignalingAdapter, VoiceConnection, VoiceConnectionStatus},
    room::RoomConnector,
};

pub fn key(guild_id: &GuildId, channel_id: &ChannelId) -> String {
    format!("{guild_id}:{channel_id}")
}

/// Live voice connections keyed by `guild:channel`. At most one per key.
///
/// Replacement happens under the key's shard lock, so adapters and
/// subscribers must not call back into the registry from `destroy`.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, VoiceConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connection for the channel, destroying any existing one for
    /// the same key in the same step.
    pub fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        voice: VoiceConfig,
        adapter: Arc<dyn SignalingAdapter>,
        connector: Arc<dyn RoomConnector>,
    ) -> VoiceConnection {
        match self.connections.entry(key(&guild_id, &channel_id)) {
            Entry::Occupied(mut entry) => {
                info!("[{}] Replacing voice connection for {}", guild_id, channel_id);
                entry.get().destroy();
                let connection = VoiceConnection::new(guild_id, channel_id, voice, adapter, connector);
                entry.insert(connection.clone());
                connection
            }
            Entry::Vacant(entry) => {
                let connection = VoiceConnection::new(guild_id, channel_id, voice, adapter, connector);
                entry.insert(connection.clone());
                connection
            }
        }
    }

    /// Looks up a live connection. Entries destroyed from outside the
    /// registry are dropped on the way.
    pub fn get(&self, guild_id: &GuildId, channel_id: &ChannelId) -> Option<VoiceConnection> {
        let key = key(guild_id, channel_id);
        self.connections
            .remove_if(&key, |_, c| c.status() == VoiceConnectionStatus::Destroyed);
        self.connections.get(&key).map(|c| c.clone())
    }

    /// Destroys and removes the connection. Returns `false` if none was
    /// registered.
    pub fn destroy(&self, guild_id: &GuildId, channel_id: &ChannelId) -> bool {
        match self.connections.remove(&key(guild_id, channel_id)) {
            Some((_, connection)) => {
                connection.destroy();
                true
            }
            None => false,
        }
    }

    pub fn destroy_all(&self) {
        let keys: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, connection)) = self.connections.remove(&key) {
                connection.destroy();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

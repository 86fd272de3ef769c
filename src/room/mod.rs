//! Boundary to the media room (SFU) backend.
//!
//! The crate never speaks a room protocol itself; a backend implements these
//! traits and the voice connection and player drive them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    audio::{
        AudioFrame,
        constants::{CHANNELS, SAMPLE_RATE},
    },
    common::errors::RoomError,
};

/// Events a room pushes back to the connection that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Disconnected { reason: String },
}

/// A successfully joined room plus its event stream.
pub struct RoomLink {
    pub room: Arc<dyn MediaRoom>,
    pub events: flume::Receiver<RoomEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOptions {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl TrackOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }
    }
}

#[async_trait]
pub trait RoomConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        endpoint: &str,
        token: &str,
        room: Option<&str>,
    ) -> Result<RoomLink, RoomError>;
}

#[async_trait]
pub trait MediaRoom: Send + Sync + 'static {
    /// Leaves the room. Calling it on an already closed room is a no-op.
    async fn disconnect(&self);

    async fn publish_audio(&self, options: TrackOptions) -> Result<Box<dyn AudioTrack>, RoomError>;
}

#[async_trait]
pub trait AudioTrack: Send + Sync {
    async fn capture_frame(&self, frame: &AudioFrame) -> Result<(), RoomError>;

    async fn unpublish(&self);
}

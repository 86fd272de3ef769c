//! Voice signaling and paced audio playback for SFU-style media rooms.
//!
//! A [`gateway::VoiceConnection`] negotiates a guild's voice session over an
//! injected [`gateway::SignalingAdapter`] and joins the media room once the
//! gateway hands out credentials. An [`player::AudioPlayer`] decodes one
//! [`audio::AudioResource`] through an external process and publishes 20 ms
//! PCM frames into every ready connection it is subscribed to.

pub mod audio;
pub mod common;
pub mod configs;
pub mod gateway;
pub mod player;
pub mod registry;
pub mod room;
pub mod sources;

pub use registry::ConnectionRegistry;

pub mod adapter;
pub mod connection;
pub mod constants;
pub mod state;

pub use adapter::{GatewayPayload, SignalingAdapter, VoiceServerUpdate, VoiceStateUpdate};
pub use connection::{ConnectionEvent, ConnectionSubscriber, VoiceConnection};
pub use state::{ConnectionState, SignalingSession, VoiceConnectionStatus};

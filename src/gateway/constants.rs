/// Gateway opcode for a voice-state update (join, move or leave).
pub const VOICE_STATE_UPDATE_OP: u8 = 4;

/// Capacity of each connection's broadcast event channel.
pub const CONNECTION_EVENT_CAPACITY: usize = 64;


use serde::{Deserialize, Serialize};

/// Flags sent with every voice-state update.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default)]
pub struct VoiceConfig {
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
}

pub mod audio_player;
mod playback;
pub mod scheduler;
pub mod state;

pub use audio_player::{AudioPlayer, PlayerEvent};
pub use scheduler::{FrameScheduler, PlayerStats, Tick};
pub use state::AudioPlayerStatus;

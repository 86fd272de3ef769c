use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioPlayerStatus {
    Idle,
    /// Resource bound, waiting for the decoder's first frame.
    Buffering,
    Playing,
    /// Paused by the caller. Only `unpause` leaves it.
    Paused,
    /// Nobody can hear the player; resumes on its own once a subscriber is
    /// ready again.
    AutoPaused,
}

impl std::fmt::Display for AudioPlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerInput {
    Play,
    FirstFrame { ready: bool },
    Pause,
    Unpause { ready: bool, buffered: bool },
    SubscribersReady,
    SubscribersGone,
    Finished,
    Stop,
}

/// Next status for `input`, or `None` when the input is a no-op in the
/// current status.
pub fn next_status(current: AudioPlayerStatus, input: PlayerInput) -> Option<AudioPlayerStatus> {
    use AudioPlayerStatus::*;

    let next = match (current, input) {
        (_, PlayerInput::Play) => Buffering,

        (Buffering, PlayerInput::FirstFrame { ready: true }) => Playing,
        (Buffering, PlayerInput::FirstFrame { ready: false }) => AutoPaused,

        (Buffering | Playing | AutoPaused, PlayerInput::Pause) => Paused,

        (Paused, PlayerInput::Unpause { buffered: false, .. }) => Buffering,
        (Paused, PlayerInput::Unpause { ready: true, .. }) => Playing,
        (Paused, PlayerInput::Unpause { ready: false, .. }) => AutoPaused,

        (AutoPaused, PlayerInput::SubscribersReady) => Playing,
        (Playing, PlayerInput::SubscribersGone) => AutoPaused,

        (Idle, PlayerInput::Finished | PlayerInput::Stop) => return None,
        (_, PlayerInput::Finished | PlayerInput::Stop) => Idle,

        _ => return None,
    };
    Some(next)
}

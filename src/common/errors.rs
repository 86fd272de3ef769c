use std::time::Duration;

use thiserror::Error;

use crate::common::types::GuildId;

/// Failures surfaced by a `VoiceConnection` through its event channel.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The gateway adapter refused or could not deliver a payload.
    #[error("[{guild_id}] signaling adapter rejected {action} payload")]
    SignalingAdapter {
        guild_id: GuildId,
        action: &'static str,
    },

    #[error("[{guild_id}] media room connect to {endpoint} failed: {reason}")]
    MediaRoomConnect {
        guild_id: GuildId,
        endpoint: String,
        reason: String,
    },
}

/// Errors reported by a media room backend.
#[derive(Debug, Clone, Error)]
pub enum RoomError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("room is closed")]
    Closed,
}

/// Decode pipeline failures. Attached to `PlayerEvent::Error` with the
/// resource that was playing.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to spawn decoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decoder exited with {}: {stderr_tail}", exit_label(.code))]
    Exit {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("decoder i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Probing failures. Each kind carries just enough context to diagnose the
/// problem without dumping the tool's full output.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("failed to spawn probe `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe exited with {}: {stderr_tail}", exit_label(.code))]
    NonZeroExit {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("probe produced no output")]
    EmptyOutput,

    #[error("probe output is not valid metadata ({reason}): {prefix}")]
    Malformed { prefix: String, reason: String },

    #[error("probe timed out after {after:?}")]
    Timeout { after: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Keeps at most the last `max` bytes of `bytes` (on a char boundary) as
/// lossy UTF-8, trimmed.
pub fn tail_lossy(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}

/// Keeps at most the first `max` bytes of `bytes` (on a char boundary).
pub fn prefix_lossy(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return text.into_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

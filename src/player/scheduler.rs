//! Absolute-time frame scheduler.
//!
//! Each tick advances `next_frame_time` by exactly one frame duration from
//! its previous value, never from "now", so processing delay between ticks
//! does not accumulate into drift.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;

use crate::audio::{
    AudioFrame,
    constants::FRAME_DURATION,
    queue::{FramePoll, FrameQueue},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub frames_played: u64,
    pub buffer_underruns: u64,
}

/// Lock-free counters shared between the playback task and the player
/// handle.
#[derive(Debug, Clone, Default)]
pub struct PlayerCounters {
    frames_played: Arc<AtomicU64>,
    buffer_underruns: Arc<AtomicU64>,
}

impl PlayerCounters {
    pub fn snapshot(&self) -> PlayerStats {
        PlayerStats {
            frames_played: self.frames_played.load(Ordering::Relaxed),
            buffer_underruns: self.buffer_underruns.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.frames_played.store(0, Ordering::Relaxed);
        self.buffer_underruns.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Tick {
    Frame(AudioFrame),
    /// Queue empty while the decoder is still running. Nothing is sent but
    /// the timeline still advances.
    Underrun,
    /// Decoder done and queue drained.
    Finished,
    NotDue,
}

#[derive(Debug)]
pub struct FrameScheduler {
    next_frame_time: Instant,
    frame_duration: Duration,
    counters: PlayerCounters,
}

impl FrameScheduler {
    pub fn new(now: Instant, counters: PlayerCounters) -> Self {
        Self {
            next_frame_time: now,
            frame_duration: FRAME_DURATION,
            counters,
        }
    }

    pub fn with_frame_duration(mut self, frame_duration: Duration) -> Self {
        self.frame_duration = frame_duration;
        self
    }

    pub fn next_frame_time(&self) -> Instant {
        self.next_frame_time
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Restarts the timeline at `now`. Used when playback (re)starts so
    /// missed real time is not caught up.
    pub fn reset(&mut self, now: Instant) {
        self.next_frame_time = now;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_frame_time
    }

    pub fn stats(&self) -> PlayerStats {
        self.counters.snapshot()
    }

    pub fn tick(&mut self, now: Instant, queue: &mut FrameQueue) -> Tick {
        if !self.is_due(now) {
            return Tick::NotDue;
        }

        match queue.poll_frame() {
            FramePoll::Ready(frame) => {
                self.counters.frames_played.fetch_add(1, Ordering::Relaxed);
                self.next_frame_time += self.frame_duration;
                Tick::Frame(frame)
            }
            FramePoll::Empty => {
                self.counters
                    .buffer_underruns
                    .fetch_add(1, Ordering::Relaxed);
                self.next_frame_time += self.frame_duration;
                Tick::Underrun
            }
            FramePoll::Finished => Tick::Finished,
        }
    }
}

use std::sync::Arc;

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    audio::{AudioDecoder, AudioFrame, DecodeExit, DecodeRequest, FrameQueue, VolumeHandle},
    common::{errors::DecoderError, types::ConnectionId},
    player::{
        audio_player::PlayerShared,
        scheduler::{FrameScheduler, Tick},
        state::AudioPlayerStatus,
    },
    room::{AudioTrack, MediaRoom, TrackOptions},
};

pub(crate) enum PlaybackCommand {
    Attach(ConnectionId, Arc<dyn MediaRoom>),
    Detach(ConnectionId),
    /// Re-read the player status after a pause or unpause.
    Wake,
}

enum Outcome {
    Finished,
    Failed(DecoderError),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Buffering,
    Running,
    Frozen,
    Done,
}

impl Phase {
    fn of(status: Option<AudioPlayerStatus>) -> Self {
        match status {
            Some(AudioPlayerStatus::Buffering) => Self::Buffering,
            Some(AudioPlayerStatus::Playing) => Self::Running,
            Some(AudioPlayerStatus::Paused | AudioPlayerStatus::AutoPaused) => Self::Frozen,
            Some(AudioPlayerStatus::Idle) | None => Self::Done,
        }
    }
}

/// What a playback task needs before its first frame.
pub(crate) struct Startup {
    /// The pipeline this one replaces. It must be fully gone (decoder
    /// reaped, tracks unpublished) before this one spawns or publishes.
    pub(crate) previous: Option<JoinHandle<()>>,
    pub(crate) decoder: Arc<dyn AudioDecoder>,
    pub(crate) request: DecodeRequest,
    pub(crate) ready: Vec<(ConnectionId, Arc<dyn MediaRoom>)>,
}

/// One resource's playback: consumes the decoder's queue on the scheduler's
/// clock and fans frames out to every published track.
pub(crate) struct Playback<T> {
    pub(crate) shared: Arc<PlayerShared<T>>,
    pub(crate) generation: u64,
    pub(crate) input: String,
    pub(crate) queue: FrameQueue,
    pub(crate) exit: Option<DecodeExit>,
    pub(crate) cancel: CancellationToken,
    pub(crate) commands: flume::Receiver<PlaybackCommand>,
    pub(crate) scheduler: FrameScheduler,
    pub(crate) volume: VolumeHandle,
    pub(crate) tracks: Vec<(ConnectionId, Box<dyn AudioTrack>)>,
    pub(crate) started: bool,
}

impl<T: Clone + Send + Sync + 'static> Playback<T> {
    pub(crate) async fn run(mut self, startup: Startup) {
        let Startup {
            previous,
            decoder,
            request,
            ready,
        } = startup;

        if let Some(previous) = previous {
            let _ = previous.await;
        }
        if self.cancel.is_cancelled() {
            return;
        }

        match decoder.spawn(request) {
            Ok(exit) => self.exit = Some(exit),
            Err(e) => {
                self.shared.finish(self.generation, Some(e));
                return;
            }
        }

        for (id, room) in ready {
            self.attach(id, room).await;
        }

        let mut last = Phase::Buffering;
        let outcome = loop {
            let phase = Phase::of(self.shared.status_if_current(self.generation));
            if phase == Phase::Done {
                break Outcome::Cancelled;
            }
            if phase == Phase::Running && last != Phase::Running {
                self.scheduler.reset(Instant::now());
            }
            last = phase;

            let next_frame_time = self.scheduler.next_frame_time();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Outcome::Cancelled,
                command = self.commands.recv_async() => match command {
                    Ok(command) => self.handle(command).await,
                    Err(_) => break Outcome::Cancelled,
                },
                exit = decoder_exit(&mut self.exit) => {
                    if let Some(Err(e)) = exit {
                        break Outcome::Failed(e);
                    }
                }
                ready = self.queue.wait_ready(), if phase == Phase::Buffering => {
                    if !ready {
                        break self.drained();
                    }
                    debug!("First frame buffered for {}", self.input);
                    self.shared.first_frame(self.generation, !self.tracks.is_empty());
                }
                _ = tokio::time::sleep_until(next_frame_time), if phase == Phase::Running => {
                    match self.scheduler.tick(Instant::now(), &mut self.queue) {
                        Tick::Frame(frame) => self.send(frame).await,
                        Tick::Underrun => trace!("Buffer underrun on {}", self.input),
                        Tick::Finished => break self.drained(),
                        Tick::NotDue => {}
                    }
                }
            }
        };

        if matches!(outcome, Outcome::Cancelled) {
            self.cancel.cancel();
            if let Some(exit) = self.exit.take() {
                let _ = exit.await;
            }
            let dropped = self.queue.clear();
            trace!("Dropped {} buffered frames of {}", dropped, self.input);
        }

        for (_, track) in self.tracks.drain(..) {
            track.unpublish().await;
        }

        match outcome {
            Outcome::Finished => {
                debug!(
                    "Playback of {} finished ({:?})",
                    self.input,
                    self.scheduler.stats()
                );
                self.shared.finish(self.generation, None);
            }
            Outcome::Failed(e) => self.shared.finish(self.generation, Some(e)),
            Outcome::Cancelled => {}
        }
    }

    /// The queue reported completion; a decoder failure reported just before
    /// it closed the queue still wins.
    fn drained(&mut self) -> Outcome {
        match self.exit.take().map(|mut exit| exit.try_recv()) {
            Some(Ok(Err(e))) => Outcome::Failed(e),
            _ => Outcome::Finished,
        }
    }

    async fn handle(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Attach(id, room) => self.attach(id, room).await,
            PlaybackCommand::Detach(id) => self.detach(id).await,
            PlaybackCommand::Wake => {}
        }
        self.shared
            .reconcile(self.generation, !self.tracks.is_empty());
    }

    async fn attach(&mut self, id: ConnectionId, room: Arc<dyn MediaRoom>) {
        if self.tracks.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        match room.publish_audio(TrackOptions::named("audio")).await {
            Ok(track) => {
                debug!("Published track for {} on connection {}", self.input, id);
                self.tracks.push((id, track));
            }
            Err(e) => warn!("Failed to publish track on connection {}: {}", id, e),
        }
    }

    async fn detach(&mut self, id: ConnectionId) {
        if let Some(at) = self.tracks.iter().position(|(existing, _)| *existing == id) {
            let (_, track) = self.tracks.remove(at);
            track.unpublish().await;
        }
    }

    async fn send(&mut self, frame: AudioFrame) {
        if !self.started {
            self.started = true;
            self.shared.mark_started(self.generation);
        }

        let frame = frame.with_volume(self.volume.get());
        let mut failed = Vec::new();
        for (id, track) in &self.tracks {
            if let Err(e) = track.capture_frame(&frame).await {
                warn!("Dropping track on connection {}: {}", id, e);
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            for id in failed {
                self.detach(id).await;
            }
            self.shared
                .reconcile(self.generation, !self.tracks.is_empty());
        }
    }
}

async fn decoder_exit(exit: &mut Option<DecodeExit>) -> Option<Result<(), DecoderError>> {
    match exit {
        Some(rx) => {
            let result = rx.await.ok();
            *exit = None;
            result
        }
        None => std::future::pending().await,
    }
}

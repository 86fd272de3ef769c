use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    audio::{AudioDecoder, AudioResource, DecodeRequest, FfmpegDecoder, frame_queue},
    common::{errors::DecoderError, types::ConnectionId},
    configs::PlayerConfig,
    gateway::ConnectionSubscriber,
    player::{
        playback::{Playback, PlaybackCommand, Startup},
        scheduler::{FrameScheduler, PlayerCounters, PlayerStats},
        state::{AudioPlayerStatus, PlayerInput, next_status},
    },
    room::MediaRoom,
};

/// Capacity of each player's broadcast event channel.
const PLAYER_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum PlayerEvent<T> {
    StateChange {
        from: AudioPlayerStatus,
        to: AudioPlayerStatus,
    },
    /// The player entered `Idle`.
    Idle,
    /// Decoding failed for the bound resource.
    Error {
        input: String,
        metadata: T,
        message: String,
    },
}

pub(crate) struct Pipeline {
    cancel: CancellationToken,
    commands: flume::Sender<PlaybackCommand>,
    task: JoinHandle<()>,
}

pub(crate) struct PlayerState<T> {
    status: AudioPlayerStatus,
    resource: Option<AudioResource<T>>,
    /// Bumped for every pipeline. A playback task may only touch the state
    /// while its generation is current.
    generation: u64,
    /// The current pipeline has produced its first frame.
    buffered: bool,
    pipeline: Option<Pipeline>,
    /// Task of a stopped pipeline that may still be winding down.
    draining: Option<JoinHandle<()>>,
    subscribers: HashSet<ConnectionId>,
    ready: HashMap<ConnectionId, Arc<dyn MediaRoom>>,
}

pub(crate) struct PlayerShared<T> {
    state: Mutex<PlayerState<T>>,
    events: broadcast::Sender<PlayerEvent<T>>,
    counters: PlayerCounters,
}

impl<T: Clone + Send + Sync + 'static> PlayerShared<T> {
    fn transition(&self, state: &mut PlayerState<T>, input: PlayerInput) -> bool {
        let Some(to) = next_status(state.status, input) else {
            return false;
        };
        let from = state.status;
        if from == to {
            return false;
        }
        state.status = to;
        debug!("Player {} -> {}", from, to);
        let _ = self.events.send(PlayerEvent::StateChange { from, to });
        if to == AudioPlayerStatus::Idle {
            let _ = self.events.send(PlayerEvent::Idle);
        }
        true
    }

    pub(crate) fn status_if_current(&self, generation: u64) -> Option<AudioPlayerStatus> {
        let state = self.state.lock();
        (state.generation == generation).then_some(state.status)
    }

    pub(crate) fn first_frame(&self, generation: u64, ready: bool) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.buffered = true;
        self.transition(&mut state, PlayerInput::FirstFrame { ready });
    }

    pub(crate) fn mark_started(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Some(resource) = state.resource.as_mut() {
            resource.started = true;
        }
    }

    /// Lines the live status up with whether any track is published.
    pub(crate) fn reconcile(&self, generation: u64, has_listeners: bool) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let input = match (state.status, has_listeners) {
            (AudioPlayerStatus::AutoPaused, true) => PlayerInput::SubscribersReady,
            (AudioPlayerStatus::Playing, false) => PlayerInput::SubscribersGone,
            _ => return,
        };
        self.transition(&mut state, input);
    }

    pub(crate) fn finish(&self, generation: u64, failure: Option<DecoderError>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.pipeline = None;
        if let Some(error) = failure {
            self.fail(&mut state, error);
            return;
        }
        if let Some(resource) = state.resource.as_mut() {
            resource.ended = true;
        }
        self.transition(&mut state, PlayerInput::Finished);
    }

    fn fail(&self, state: &mut PlayerState<T>, error: DecoderError) {
        if let Some(resource) = state.resource.as_mut() {
            resource.ended = true;
            error!("Playback of {} failed: {}", resource.input(), error);
            let _ = self.events.send(PlayerEvent::Error {
                input: resource.input().to_string(),
                metadata: resource.metadata().clone(),
                message: error.to_string(),
            });
        }
        self.transition(state, PlayerInput::Finished);
    }
}

/// Plays one [`AudioResource`] at a time into every ready connection it is
/// subscribed to.
///
/// Cloning yields another handle to the same player; pass a clone to
/// `VoiceConnection::subscribe`. Methods that start playback must run
/// inside a tokio runtime.
pub struct AudioPlayer<T> {
    shared: Arc<PlayerShared<T>>,
    decoder: Arc<dyn AudioDecoder>,
    max_queued_frames: usize,
}

impl<T> Clone for AudioPlayer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            decoder: self.decoder.clone(),
            max_queued_frames: self.max_queued_frames,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AudioPlayer<T> {
    pub fn new(config: &PlayerConfig) -> Self {
        Self::with_decoder(config, Arc::new(FfmpegDecoder::new(config)))
    }

    pub fn with_decoder(config: &PlayerConfig, decoder: Arc<dyn AudioDecoder>) -> Self {
        let (events, _) = broadcast::channel(PLAYER_EVENT_CAPACITY);
        Self {
            shared: Arc::new(PlayerShared {
                state: Mutex::new(PlayerState {
                    status: AudioPlayerStatus::Idle,
                    resource: None,
                    generation: 0,
                    buffered: false,
                    pipeline: None,
                    draining: None,
                    subscribers: HashSet::new(),
                    ready: HashMap::new(),
                }),
                events,
                counters: PlayerCounters::default(),
            }),
            decoder,
            max_queued_frames: config.max_queued_frames,
        }
    }

    pub fn status(&self) -> AudioPlayerStatus {
        self.shared.state.lock().status
    }

    pub fn stats(&self) -> PlayerStats {
        self.shared.counters.snapshot()
    }

    pub fn events(&self) -> broadcast::Receiver<PlayerEvent<T>> {
        self.shared.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    pub fn ready_count(&self) -> usize {
        self.shared.state.lock().ready.len()
    }

    /// Runs `f` against the bound resource, if any.
    pub fn with_resource<R>(&self, f: impl FnOnce(&AudioResource<T>) -> R) -> Option<R> {
        self.shared.state.lock().resource.as_ref().map(f)
    }

    /// Replaces whatever is playing with `resource`.
    ///
    /// The previous pipeline is cancelled, and the new decoder is only
    /// spawned once that pipeline has fully wound down. Decoder failures,
    /// including a failure to spawn, are reported as `PlayerEvent::Error`
    /// and leave the player `Idle`.
    pub fn play(&self, resource: AudioResource<T>) {
        let mut state = self.shared.state.lock();

        let draining = state.draining.take();
        let previous = match state.pipeline.take() {
            Some(pipeline) => {
                pipeline.cancel.cancel();
                Some(pipeline.task)
            }
            None => draining,
        };
        state.generation += 1;
        state.buffered = false;
        let generation = state.generation;
        self.shared.counters.reset();

        let input = resource.input().to_string();
        let shape = resource.shape();
        let volume = resource.volume_handle();
        state.resource = Some(resource);
        self.shared.transition(&mut state, PlayerInput::Play);
        info!("Playing {}", input);

        let (frames, queue) = frame_queue(self.max_queued_frames);
        let cancel = CancellationToken::new();
        let startup = Startup {
            previous,
            decoder: self.decoder.clone(),
            request: DecodeRequest {
                input: input.clone(),
                shape,
                frames,
                cancel: cancel.child_token(),
            },
            ready: state
                .ready
                .iter()
                .map(|(id, room)| (*id, room.clone()))
                .collect(),
        };

        let (commands_tx, commands_rx) = flume::unbounded();
        let playback = Playback {
            shared: self.shared.clone(),
            generation,
            input,
            queue,
            exit: None,
            cancel: cancel.clone(),
            commands: commands_rx,
            scheduler: FrameScheduler::new(Instant::now(), self.shared.counters.clone()),
            volume,
            tracks: Vec::new(),
            started: false,
        };
        let task = tokio::spawn(playback.run(startup));

        state.pipeline = Some(Pipeline {
            cancel,
            commands: commands_tx,
            task,
        });
    }

    /// Returns `false` when there is nothing to pause.
    pub fn pause(&self) -> bool {
        let mut state = self.shared.state.lock();
        let changed = self.shared.transition(&mut state, PlayerInput::Pause);
        if changed {
            wake(&state);
        }
        changed
    }

    /// Returns `false` unless the player was paused by [`pause`](Self::pause).
    pub fn unpause(&self) -> bool {
        let mut state = self.shared.state.lock();
        let input = PlayerInput::Unpause {
            ready: !state.ready.is_empty(),
            buffered: state.buffered,
        };
        let changed = self.shared.transition(&mut state, input);
        if changed {
            wake(&state);
        }
        changed
    }

    /// Kills the decoder, drops queued frames and returns to `Idle`.
    ///
    /// Without `force` a frame that is being delivered right now is allowed
    /// to finish; with `force` the playback task is aborted at once.
    /// Returns `false` if the player was already idle.
    pub fn stop(&self, force: bool) -> bool {
        let mut state = self.shared.state.lock();
        let pipeline = state.pipeline.take();
        let stopped = pipeline.is_some();
        if let Some(pipeline) = pipeline {
            pipeline.cancel.cancel();
            if force {
                pipeline.task.abort();
            }
            state.draining = Some(pipeline.task);
        }
        state.generation += 1;
        if let Some(resource) = state.resource.as_mut() {
            resource.ended = true;
        }
        let changed = self.shared.transition(&mut state, PlayerInput::Stop);
        changed || stopped
    }
}

fn wake<T>(state: &PlayerState<T>) {
    if let Some(pipeline) = &state.pipeline {
        let _ = pipeline.commands.send(PlaybackCommand::Wake);
    }
}

impl<T: Clone + Send + Sync + 'static> ConnectionSubscriber for AudioPlayer<T> {
    fn on_subscribed(&self, connection: ConnectionId) {
        self.shared.state.lock().subscribers.insert(connection);
    }

    fn on_unsubscribed(&self, connection: ConnectionId) {
        let mut state = self.shared.state.lock();
        state.subscribers.remove(&connection);
        if state.ready.remove(&connection).is_some() {
            if let Some(pipeline) = &state.pipeline {
                let _ = pipeline.commands.send(PlaybackCommand::Detach(connection));
            }
        }
    }

    fn on_connection_ready(&self, connection: ConnectionId, room: Arc<dyn MediaRoom>) {
        let mut state = self.shared.state.lock();
        if !state.subscribers.contains(&connection) {
            return;
        }
        state.ready.insert(connection, room.clone());
        if let Some(pipeline) = &state.pipeline {
            let _ = pipeline
                .commands
                .send(PlaybackCommand::Attach(connection, room));
        }
    }

    fn on_connection_lost(&self, connection: ConnectionId) {
        let mut state = self.shared.state.lock();
        if state.ready.remove(&connection).is_some() {
            if let Some(pipeline) = &state.pipeline {
                let _ = pipeline.commands.send(PlaybackCommand::Detach(connection));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{AudioFrame, DecodeExit, StreamShape},
        common::errors::RoomError,
        room::{AudioTrack, TrackOptions},
    };
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::sync::oneshot;

    /// Pushes `frames` silent frames, then exits with `result`.
    struct ScriptedDecoder {
        frames: usize,
        fail_with: Option<i32>,
    }

    impl AudioDecoder for ScriptedDecoder {
        fn spawn(&self, request: DecodeRequest) -> Result<DecodeExit, DecoderError> {
            let (tx, rx) = oneshot::channel();
            let frames = self.frames;
            let fail_with = self.fail_with;
            tokio::spawn(async move {
                for _ in 0..frames {
                    tokio::select! {
                        _ = request.cancel.cancelled() => return,
                        ok = request.frames.push(AudioFrame::silence()) => if !ok { return },
                    }
                }
                let result = match fail_with {
                    Some(code) => Err(DecoderError::Exit {
                        code: Some(code),
                        stderr_tail: "boom".into(),
                    }),
                    None => Ok(()),
                };
                let _ = tx.send(result);
            });
            Ok(rx)
        }
    }

    struct BrokenDecoder;

    impl AudioDecoder for BrokenDecoder {
        fn spawn(&self, _request: DecodeRequest) -> Result<DecodeExit, DecoderError> {
            Err(DecoderError::Spawn {
                program: "ffmpeg".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    #[derive(Default)]
    struct CountingRoom {
        captured: Arc<AtomicUsize>,
    }

    struct CountingTrack {
        captured: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AudioTrack for CountingTrack {
        async fn capture_frame(&self, _frame: &AudioFrame) -> Result<(), RoomError> {
            self.captured.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unpublish(&self) {}
    }

    #[async_trait]
    impl MediaRoom for CountingRoom {
        async fn disconnect(&self) {}

        async fn publish_audio(
            &self,
            _options: TrackOptions,
        ) -> Result<Box<dyn AudioTrack>, RoomError> {
            Ok(Box::new(CountingTrack {
                captured: self.captured.clone(),
            }))
        }
    }

    fn player(decoder: impl AudioDecoder) -> AudioPlayer<&'static str> {
        AudioPlayer::with_decoder(&PlayerConfig::default(), Arc::new(decoder))
    }

    fn resource() -> AudioResource<&'static str> {
        AudioResource::new("song.mp3", StreamShape::Arbitrary, "meta")
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for(player: &AudioPlayer<&'static str>, status: AudioPlayerStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while player.status() != status {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("status reached");
    }

    #[tokio::test(start_paused = true)]
    async fn without_listeners_the_player_auto_pauses() {
        let player = player(ScriptedDecoder {
            frames: 5,
            fail_with: None,
        });
        player.play(resource());
        assert_eq!(player.status(), AudioPlayerStatus::Buffering);

        wait_for(&player, AudioPlayerStatus::AutoPaused).await;
        assert_eq!(player.stats().frames_played, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_connection_resumes_and_plays_to_idle() {
        let player = player(ScriptedDecoder {
            frames: 10,
            fail_with: None,
        });
        let mut events = player.events();
        let room = CountingRoom::default();
        let captured = room.captured.clone();
        let id = ConnectionId::generate();

        player.play(resource());
        player.on_subscribed(id);
        wait_for(&player, AudioPlayerStatus::AutoPaused).await;

        player.on_connection_ready(id, Arc::new(room));
        wait_for(&player, AudioPlayerStatus::Idle).await;

        assert_eq!(captured.load(Ordering::SeqCst), 10);
        assert_eq!(player.stats().frames_played, 10);
        assert_eq!(player.with_resource(|r| (r.started(), r.ended())), Some((true, true)));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let resumed = seen
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    PlayerEvent::StateChange {
                        from: AudioPlayerStatus::AutoPaused,
                        to: AudioPlayerStatus::Playing
                    }
                )
            })
            .count();
        assert_eq!(resumed, 1);
        assert!(matches!(seen.last(), Some(PlayerEvent::Idle)));
    }

    #[tokio::test(start_paused = true)]
    async fn decoder_failure_reports_resource() {
        let player = player(ScriptedDecoder {
            frames: 0,
            fail_with: Some(1),
        });
        let mut events = player.events();
        player.play(resource());
        wait_for(&player, AudioPlayerStatus::Idle).await;

        let mut error = None;
        while let Ok(event) = events.try_recv() {
            if let PlayerEvent::Error {
                input,
                metadata,
                message,
            } = event
            {
                error = Some((input, metadata, message));
            }
        }
        let (input, metadata, message) = error.expect("error event");
        assert_eq!(input, "song.mp3");
        assert_eq!(metadata, "meta");
        assert!(message.contains("status 1"));
    }

    #[tokio::test]
    async fn spawn_failure_ends_in_idle() {
        let player = player(BrokenDecoder);
        let mut events = player.events();
        player.play(resource());
        wait_for(&player, AudioPlayerStatus::Idle).await;

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, PlayerEvent::Error { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_unpause_are_not_toggles() {
        let player = player(ScriptedDecoder {
            frames: 500,
            fail_with: None,
        });
        let id = ConnectionId::generate();
        player.on_subscribed(id);
        player.on_connection_ready(id, Arc::new(CountingRoom::default()));
        player.play(resource());
        wait_for(&player, AudioPlayerStatus::Playing).await;

        assert!(player.pause());
        assert!(!player.pause());
        settle().await;
        let frozen = player.stats().frames_played;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(player.stats().frames_played, frozen);

        assert!(player.unpause());
        assert!(!player.unpause());
        wait_for(&player, AudioPlayerStatus::Playing).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(player.stats().frames_played > frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_safe_to_repeat() {
        let player = player(ScriptedDecoder {
            frames: 500,
            fail_with: None,
        });
        player.play(resource());
        settle().await;

        assert!(player.stop(false));
        assert_eq!(player.status(), AudioPlayerStatus::Idle);
        assert!(!player.stop(false));
        assert!(!player.stop(true));
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_only_connection_auto_pauses() {
        let player = player(ScriptedDecoder {
            frames: 500,
            fail_with: None,
        });
        let id = ConnectionId::generate();
        player.on_subscribed(id);
        player.on_connection_ready(id, Arc::new(CountingRoom::default()));
        player.play(resource());
        wait_for(&player, AudioPlayerStatus::Playing).await;

        player.on_connection_lost(id);
        wait_for(&player, AudioPlayerStatus::AutoPaused).await;
        assert_eq!(player.ready_count(), 0);
        assert_eq!(player.subscriber_count(), 1);

        player.on_unsubscribed(id);
        assert_eq!(player.subscriber_count(), 0);
    }

    fn bump(live: &AtomicUsize, max: &AtomicUsize) {
        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
    }

    /// Endless decoder that records how many instances run at once.
    #[derive(Clone, Default)]
    struct TrackingDecoder {
        live: Arc<AtomicUsize>,
        max: Arc<AtomicUsize>,
    }

    impl AudioDecoder for TrackingDecoder {
        fn spawn(&self, request: DecodeRequest) -> Result<DecodeExit, DecoderError> {
            let (tx, rx) = oneshot::channel::<Result<(), DecoderError>>();
            bump(&self.live, &self.max);
            let live = self.live.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = request.cancel.cancelled() => break,
                        ok = request.frames.push(AudioFrame::silence()) => if !ok { break },
                    }
                }
                live.fetch_sub(1, Ordering::SeqCst);
                drop(tx);
            });
            Ok(rx)
        }
    }

    #[derive(Clone, Default)]
    struct LiveRoom {
        live: Arc<AtomicUsize>,
        max: Arc<AtomicUsize>,
    }

    struct LiveTrack(Arc<AtomicUsize>);

    #[async_trait]
    impl AudioTrack for LiveTrack {
        async fn capture_frame(&self, _frame: &AudioFrame) -> Result<(), RoomError> {
            Ok(())
        }

        async fn unpublish(&self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MediaRoom for LiveRoom {
        async fn disconnect(&self) {}

        async fn publish_audio(
            &self,
            _options: TrackOptions,
        ) -> Result<Box<dyn AudioTrack>, RoomError> {
            bump(&self.live, &self.max);
            Ok(Box::new(LiveTrack(self.live.clone())))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replaying_never_overlaps_pipelines() {
        let decoder = TrackingDecoder::default();
        let room = LiveRoom::default();
        let player = player(decoder.clone());
        let id = ConnectionId::generate();
        player.on_subscribed(id);
        player.on_connection_ready(id, Arc::new(room.clone()));

        for round in 0..40 {
            player.play(resource());
            if round % 4 == 0 {
                tokio::time::sleep(Duration::from_millis(3)).await;
            } else {
                tokio::task::yield_now().await;
            }
            if round % 10 == 5 {
                player.stop(false);
            }
        }
        wait_for(&player, AudioPlayerStatus::Playing).await;

        assert_eq!(room.max.load(Ordering::SeqCst), 1);
        assert_eq!(decoder.max.load(Ordering::SeqCst), 1);

        player.stop(false);
        tokio::time::timeout(Duration::from_secs(5), async {
            while room.live.load(Ordering::SeqCst) + decoder.live.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("last pipeline wound down");
    }
}

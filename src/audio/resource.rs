use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

/// Declared shape of the input stream. Used to hint the decoder's demuxer;
/// the decoder output is always raw PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamShape {
    /// Let the decoder probe the container.
    #[default]
    Arbitrary,
    /// 48 kHz stereo s16le already.
    Raw,
    /// Opus audio in a container left to the decoder to probe. Only the
    /// audio decoder is pinned.
    Opus,
    OggOpus,
    WebmOpus,
}

impl StreamShape {
    /// Decoder flags placed before `-i` for this shape.
    pub fn input_args(self) -> &'static [&'static str] {
        match self {
            Self::Arbitrary => &[],
            Self::Raw => &["-f", "s16le", "-ar", "48000", "-ac", "2"],
            Self::Opus => &["-c:a", "opus"],
            Self::OggOpus => &["-f", "ogg"],
            Self::WebmOpus => &["-f", "webm"],
        }
    }
}

/// Shared, lock-free playback volume in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct VolumeHandle(Arc<AtomicU32>);

impl VolumeHandle {
    pub fn new(volume: f32) -> Self {
        Self(Arc::new(AtomicU32::new(clamp_volume(volume).to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, volume: f32) {
        self.0
            .store(clamp_volume(volume).to_bits(), Ordering::Release);
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}

/// One playback request: what to decode, how it is shaped, and whatever the
/// caller wants to carry along with it.
///
/// `started` and `ended` are only written by the player that owns the
/// resource.
#[derive(Debug, Clone)]
pub struct AudioResource<T> {
    input: String,
    shape: StreamShape,
    metadata: T,
    volume: VolumeHandle,
    pub(crate) started: bool,
    pub(crate) ended: bool,
}

impl<T> AudioResource<T> {
    pub fn new(input: impl Into<String>, shape: StreamShape, metadata: T) -> Self {
        Self {
            input: input.into(),
            shape,
            metadata,
            volume: VolumeHandle::new(1.0),
            started: false,
            ended: false,
        }
    }

    pub fn with_volume(self, volume: f32) -> Self {
        self.volume.set(volume);
        self
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn shape(&self) -> StreamShape {
        self.shape
    }

    pub fn metadata(&self) -> &T {
        &self.metadata
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    /// Handle that keeps controlling this resource's volume after it has
    /// been moved into a player.
    pub fn volume_handle(&self) -> VolumeHandle {
        self.volume.clone()
    }

    /// True once the first frame has been sent.
    pub fn started(&self) -> bool {
        self.started
    }

    /// True once the decoder finished (or failed) and no frames remain.
    pub fn ended(&self) -> bool {
        self.ended
    }
}

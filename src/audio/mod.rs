pub mod constants;
pub mod decoder;
pub mod frame;
pub mod queue;
pub mod resource;

pub use decoder::{AudioDecoder, DecodeExit, DecodeRequest, FfmpegDecoder};
pub use frame::{AudioFrame, PcmFrameCodec};
pub use queue::{FramePoll, FrameProducer, FrameQueue, frame_queue};
pub use resource::{AudioResource, StreamShape, VolumeHandle};

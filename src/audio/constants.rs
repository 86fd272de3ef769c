//! Central constants for the audio pipeline.
//!
//! The decoder is always asked for the same raw format so every stage after
//! it can rely on fixed-size frames.

use std::time::Duration;

/// Output sample rate requested from the decoder (Hz).
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count requested from the decoder.
pub const CHANNELS: u16 = 2;

/// Bytes per sample of signed 16-bit little-endian PCM.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Duration of one scheduled frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const SAMPLES_PER_CHANNEL: usize = 960;

/// Bytes in one 20 ms stereo s16le frame (960 × 2 × 2).
pub const FRAME_SIZE_BYTES: usize = SAMPLES_PER_CHANNEL * CHANNELS as usize * BYTES_PER_SAMPLE;

/// Bytes of decoder stderr kept for error reports.
pub const STDERR_TAIL_BYTES: usize = 512;

/// Raw format flags handed to the decoder for its output stream.
pub const DECODER_OUTPUT_ARGS: [&str; 7] = ["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"];

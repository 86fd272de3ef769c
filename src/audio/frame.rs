//! Fixed-duration PCM frames and the codec that cuts decoder output into them.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::audio::constants::FRAME_SIZE_BYTES;

/// One 20 ms chunk of interleaved stereo s16le PCM at 48 kHz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Bytes,
}

impl AudioFrame {
    /// Wraps exactly one frame's worth of bytes. Returns `None` on a size
    /// mismatch.
    pub fn from_pcm(pcm: Bytes) -> Option<Self> {
        (pcm.len() == FRAME_SIZE_BYTES).then_some(Self { pcm })
    }

    pub fn silence() -> Self {
        Self {
            pcm: Bytes::from(vec![0u8; FRAME_SIZE_BYTES]),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pcm
    }

    /// Interleaved samples decoded from the little-endian byte stream.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Returns a copy scaled by `volume`, saturating at the i16 range.
    /// Unity gain hands back the same buffer without copying.
    pub fn with_volume(&self, volume: f32) -> Self {
        if (volume - 1.0).abs() <= f32::EPSILON {
            return self.clone();
        }

        let mut out = BytesMut::with_capacity(FRAME_SIZE_BYTES);
        for sample in self.samples() {
            let s = (sample as f32 * volume) as i32;
            let s = s.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out.extend_from_slice(&s.to_le_bytes());
        }
        Self { pcm: out.freeze() }
    }
}

/// Splits a raw PCM byte stream into [`AudioFrame`]s.
///
/// `FramedRead` keeps the partial tail of one read in its buffer and prefixes
/// it onto the next, so frames never straddle reads. At end of stream a
/// trailing partial frame is zero-padded rather than dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmFrameCodec;

impl Decoder for PcmFrameCodec {
    type Item = AudioFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_SIZE_BYTES {
            src.reserve(FRAME_SIZE_BYTES - src.len());
            return Ok(None);
        }
        let pcm = src.split_to(FRAME_SIZE_BYTES).freeze();
        Ok(Some(AudioFrame { pcm }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let mut pcm = src.split();
        pcm.resize(FRAME_SIZE_BYTES, 0);
        Ok(Some(AudioFrame { pcm: pcm.freeze() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(sample: i16) -> AudioFrame {
        let mut pcm = BytesMut::with_capacity(FRAME_SIZE_BYTES);
        for _ in 0..FRAME_SIZE_BYTES / 2 {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        AudioFrame::from_pcm(pcm.freeze()).unwrap()
    }

    #[test]
    fn frame_size_is_twenty_ms_of_stereo_s16() {
        assert_eq!(FRAME_SIZE_BYTES, 3_840);
        assert!(AudioFrame::from_pcm(Bytes::from(vec![0u8; 100])).is_none());
    }

    #[test]
    fn partial_reads_are_carried_into_the_next_frame() {
        let mut codec = PcmFrameCodec;
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&vec![1u8; 3_000]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&vec![2u8; 1_000]);
        let frame = codec.decode(&mut buf).unwrap().expect("a full frame");
        assert_eq!(frame.as_bytes().len(), FRAME_SIZE_BYTES);
        assert_eq!(frame.as_bytes()[2_999], 1);
        assert_eq!(frame.as_bytes()[3_000], 2);
        assert_eq!(buf.len(), 160);
    }

    #[test]
    fn one_read_can_hold_several_frames() {
        let mut codec = PcmFrameCodec;
        let mut buf = BytesMut::from(&vec![0u8; FRAME_SIZE_BYTES * 2 + 10][..]);

        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn trailing_bytes_are_padded_at_eof() {
        let mut codec = PcmFrameCodec;
        let mut buf = BytesMut::from(&[7u8, 7, 7, 7][..]);

        let frame = codec.decode_eof(&mut buf).unwrap().expect("padded frame");
        assert_eq!(&frame.as_bytes()[..4], &[7, 7, 7, 7]);
        assert!(frame.as_bytes()[4..].iter().all(|b| *b == 0));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn volume_scales_and_saturates() {
        let half = frame_of(1_000).with_volume(0.5);
        assert!(half.samples().all(|s| s == 500));

        let loud = frame_of(i16::MAX).with_volume(2.0);
        assert!(loud.samples().all(|s| s == i16::MAX));

        let muted = frame_of(-1_234).with_volume(0.0);
        assert!(muted.samples().all(|s| s == 0));
    }

    #[test]
    fn unity_volume_keeps_buffer() {
        let frame = frame_of(321);
        assert_eq!(frame.with_volume(1.0), frame);
    }
}

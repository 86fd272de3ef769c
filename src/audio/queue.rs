//! Bounded single-producer/single-consumer frame queue.
//!
//! The decoder task owns the [`FrameProducer`]; dropping it is how the
//! decoder signals that no more frames will arrive. The scheduler owns the
//! [`FrameQueue`] and polls it without blocking once playback runs.

use crate::audio::frame::AudioFrame;

/// Result of one non-blocking poll of the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum FramePoll {
    Ready(AudioFrame),
    /// Nothing buffered yet, but the producer is still alive.
    Empty,
    /// The producer is gone and the queue is drained.
    Finished,
}

pub fn frame_queue(capacity: usize) -> (FrameProducer, FrameQueue) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (FrameProducer { tx }, FrameQueue { rx, stash: None })
}

pub struct FrameProducer {
    tx: flume::Sender<AudioFrame>,
}

impl FrameProducer {
    /// Waits for room in the queue. Returns `false` once the consumer is gone.
    pub async fn push(&self, frame: AudioFrame) -> bool {
        self.tx.send_async(frame).await.is_ok()
    }

    /// Pushes without waiting; hands the frame back when the queue is full
    /// or closed.
    pub fn try_push(&self, frame: AudioFrame) -> Result<(), AudioFrame> {
        self.tx.try_send(frame).map_err(|e| e.into_inner())
    }
}

pub struct FrameQueue {
    rx: flume::Receiver<AudioFrame>,
    /// Frame pulled by `wait_ready` and not yet handed out.
    stash: Option<AudioFrame>,
}

impl FrameQueue {
    pub fn poll_frame(&mut self) -> FramePoll {
        if let Some(frame) = self.stash.take() {
            return FramePoll::Ready(frame);
        }
        match self.rx.try_recv() {
            Ok(frame) => FramePoll::Ready(frame),
            Err(flume::TryRecvError::Empty) => FramePoll::Empty,
            Err(flume::TryRecvError::Disconnected) => FramePoll::Finished,
        }
    }

    /// Waits until a frame is available without consuming it. Returns
    /// `false` if the producer finished without another frame.
    pub async fn wait_ready(&mut self) -> bool {
        if self.stash.is_some() {
            return true;
        }
        match self.rx.recv_async().await {
            Ok(frame) => {
                self.stash = Some(frame);
                true
            }
            Err(_) => false,
        }
    }

    /// Drops everything currently buffered and returns how many frames went.
    pub fn clear(&mut self) -> usize {
        usize::from(self.stash.take().is_some()) + self.rx.drain().count()
    }
}

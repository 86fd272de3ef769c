//! External decoder process → frame queue.
//!
//! A decode job is a request/response task: spawn, stream frames into the
//! queue, then report completion or failure exactly once on the exit
//! channel. Cancelling the job's token kills the process.

use std::process::Stdio;

use futures::StreamExt;
use tokio::{io::AsyncReadExt, process::Command, sync::oneshot};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, warn};

use crate::{
    audio::{
        constants::{DECODER_OUTPUT_ARGS, STDERR_TAIL_BYTES},
        frame::PcmFrameCodec,
        queue::FrameProducer,
        resource::StreamShape,
    },
    common::errors::{DecoderError, tail_lossy},
    configs::PlayerConfig,
};

pub struct DecodeRequest {
    pub input: String,
    pub shape: StreamShape,
    pub frames: FrameProducer,
    pub cancel: CancellationToken,
}

/// Completion side of a running decode job.
///
/// Resolves with `Ok(())` after a clean end of stream, with an error if the
/// process failed, and is dropped without a value when the job was cancelled.
pub type DecodeExit = oneshot::Receiver<Result<(), DecoderError>>;

/// Starts decode jobs. Spawn failures are returned immediately; everything
/// after that is reported through [`DecodeExit`].
pub trait AudioDecoder: Send + Sync + 'static {
    fn spawn(&self, request: DecodeRequest) -> Result<DecodeExit, DecoderError>;
}

/// Runs `ffmpeg` (or a compatible binary) and reads 48 kHz stereo s16le
/// from its stdout.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: String,
    input_args: Vec<String>,
}

impl FfmpegDecoder {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            program: config.decoder_program.clone(),
            input_args: config.decoder_input_args.clone(),
        }
    }

    pub fn args(&self, input: &str, shape: StreamShape) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.input_args.iter().cloned());
        args.extend(shape.input_args().iter().map(|s| s.to_string()));
        args.push("-i".to_string());
        args.push(input.to_string());
        args.extend(DECODER_OUTPUT_ARGS.iter().map(|s| s.to_string()));
        args
    }
}

impl AudioDecoder for FfmpegDecoder {
    fn spawn(&self, request: DecodeRequest) -> Result<DecodeExit, DecoderError> {
        let DecodeRequest {
            input,
            shape,
            frames,
            cancel,
        } = request;

        let mut child = Command::new(&self.program)
            .args(self.args(&input, shape))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DecoderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            DecoderError::Io(std::io::Error::other("decoder stdout was not captured"))
        })?;
        let stderr = child.stderr.take();

        debug!("Decoder started for {} (pid {:?})", input, child.id());

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let stderr_task = stderr.map(|s| tokio::spawn(read_tail(s)));

            let pumped = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    debug!("Decoder for {} cancelled", input);
                    return;
                }
                res = pump(stdout, &frames) => res,
            };

            let result = match pumped {
                Ok(PumpEnd::Eof) => match child.wait().await {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) => {
                        let stderr_tail = match stderr_task {
                            Some(task) => task.await.unwrap_or_default(),
                            None => String::new(),
                        };
                        Err(DecoderError::Exit {
                            code: status.code(),
                            stderr_tail,
                        })
                    }
                    Err(e) => Err(DecoderError::Io(e)),
                },
                Ok(PumpEnd::ConsumerGone) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return;
                }
                Err(e) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    Err(DecoderError::Io(e))
                }
            };

            if let Err(e) = &result {
                warn!("Decoder for {} failed: {}", input, e);
            }
            // Report before closing the queue so the consumer never mistakes
            // a failure for a clean end of stream.
            let _ = exit_tx.send(result);
            drop(frames);
        });

        Ok(exit_rx)
    }
}

enum PumpEnd {
    Eof,
    ConsumerGone,
}

async fn pump(
    stdout: tokio::process::ChildStdout,
    frames: &FrameProducer,
) -> std::io::Result<PumpEnd> {
    let mut reader = FramedRead::new(stdout, PcmFrameCodec);
    while let Some(frame) = reader.next().await {
        if !frames.push(frame?).await {
            return Ok(PumpEnd::ConsumerGone);
        }
    }
    Ok(PumpEnd::Eof)
}

async fn read_tail(mut stderr: tokio::process::ChildStderr) -> String {
    let mut kept = Vec::with_capacity(STDERR_TAIL_BYTES * 2);
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > STDERR_TAIL_BYTES * 4 {
                    let excess = kept.len() - STDERR_TAIL_BYTES;
                    kept.drain(..excess);
                }
            }
        }
    }
    tail_lossy(&kept, STDERR_TAIL_BYTES)
}

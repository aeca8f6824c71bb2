//! Audio output to the default device
//!
//! The cpal stream is not `Send`, so it is built and kept on a dedicated
//! thread. Its callback pulls from a [`Renderer`] and never waits on anything
//! but the render buffer lock.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{Renderer, SILENCE};
use crate::audio::device::get_default_output_device;
use crate::constants::MAX_CALLBACK_FRAMES;
use crate::error::AudioError;
use crate::sync::{frames_to_nanos, wall_clock_nanos};

/// Running output stream
pub struct AudioOutput {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    frames_played: Arc<AtomicU64>,
    config: StreamConfig,
}

impl AudioOutput {
    /// Open the default output device at `sample_rate` and start pulling from
    /// `renderer`. Returns once the stream is playing or has failed to start.
    pub fn start(renderer: Renderer, sample_rate: u32) -> Result<Self, AudioError> {
        let device = get_default_output_device()?;
        let config = device.output_config(sample_rate)?;
        tracing::info!(
            "Opening output {} ({} Hz, {} channels)",
            device.name,
            sample_rate,
            config.channels
        );

        let running = Arc::new(AtomicBool::new(true));
        let frames_played = Arc::new(AtomicU64::new(0));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let played = frames_played.clone();
        let stream_config = config.clone();
        let channels = config.channels as usize;

        let handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let cpal_device = device.into_inner();
                // Allocated once, the callback only reuses it
                let mut block = vec![SILENCE; MAX_CALLBACK_FRAMES];

                let stream = cpal_device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                        // Time the block by when it reaches the speaker, not
                        // by when the callback runs
                        let timestamp = info.timestamp();
                        let latency = timestamp
                            .playback
                            .duration_since(&timestamp.callback)
                            .unwrap_or_default();
                        let at = wall_clock_nanos() + latency.as_nanos() as i64;

                        let frames =
                            render_into(&renderer, &mut block, data, channels, sample_rate, at);
                        played.fetch_add(frames as u64, Ordering::Relaxed);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping output
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut output = Self {
            running,
            thread_handle: Some(handle),
            error_rx,
            frames_played,
            config,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(output),
            Ok(Err(e)) => {
                output.stop();
                Err(e)
            }
            Err(_) => {
                output.stop();
                Err(AudioError::StreamError("output thread exited".into()))
            }
        }
    }

    /// Stop the stream and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fill an interleaved device buffer in passes of at most `block.len()`
/// frames. `at` is the wall-clock instant its first frame is heard. Returns
/// the number of frames rendered.
fn render_into(
    renderer: &Renderer,
    block: &mut [[f64; 2]],
    data: &mut [f32],
    channels: usize,
    sample_rate: u32,
    at: i64,
) -> usize {
    if channels == 0 || block.is_empty() {
        data.fill(0.0);
        return 0;
    }

    let mut done = 0;
    for out in data.chunks_mut(block.len() * channels) {
        let frames = out.len() / channels;
        let pass = &mut block[..frames];
        renderer.fill_at(pass, at + frames_to_nanos(done, sample_rate));
        write_interleaved(pass, out, channels);
        done += frames;
    }
    done
}

/// Spread stereo frames over an interleaved device buffer of `channels`
/// channels. Mono devices get the average, extra channels stay silent.
fn write_interleaved(frames: &[[f64; 2]], out: &mut [f32], channels: usize) {
    if channels == 0 {
        return;
    }
    for (frame, slot) in frames.iter().zip(out.chunks_mut(channels)) {
        match slot {
            [mono] => *mono = ((frame[0] + frame[1]) / 2.0) as f32,
            [left, right, rest @ ..] => {
                *left = frame[0] as f32;
                *right = frame[1] as f32;
                rest.fill(0.0);
            }
            [] => {}
        }
    }
}

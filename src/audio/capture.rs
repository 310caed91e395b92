//! 16 kHz mono capture streams feeding the streaming recognizers.
//!
//! Opens a named input device at its native rate, down-mixes and resamples
//! to 16 kHz mono PCM16, and delivers 1024-frame chunks to a callback. The
//! cpal stream is thread-affine, so each capture owns a dedicated thread
//! that keeps the stream alive until stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{error, info};

use super::devices::input_device_by_name;
use super::{CAPTURE_SAMPLE_RATE, CHUNK_FRAMES};
use crate::error::EngineError;

/// Fold interleaved device audio down to 16 kHz mono in one pass:
/// channels are averaged per frame, and the stream is walked with a
/// fractional cursor whose two neighboring frames are blended linearly.
fn downmix_resample(input: &[f32], channels: u16, device_rate: u32) -> Vec<f32> {
    let width = channels.max(1) as usize;
    let frame_count = input.len() / width;
    let frame_avg = |f: usize| -> f32 {
        input[f * width..(f + 1) * width].iter().sum::<f32>() / width as f32
    };

    if device_rate == CAPTURE_SAMPLE_RATE {
        return (0..frame_count).map(|f| frame_avg(f)).collect();
    }

    let step = device_rate as f64 / CAPTURE_SAMPLE_RATE as f64;
    let wanted = (frame_count as f64 / step) as usize;
    let mut out = Vec::with_capacity(wanted);
    let mut cursor = 0.0f64;
    for _ in 0..wanted {
        let lo = cursor as usize;
        let hi = (lo + 1).min(frame_count.saturating_sub(1));
        let blend = (cursor - lo as f64) as f32;
        out.push(frame_avg(lo) * (1.0 - blend) + frame_avg(hi) * blend);
        cursor += step;
    }
    out
}

/// Quantize f32 samples in [-1, 1] to PCM16 LE bytes.
fn to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let q = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&q.to_le_bytes());
    }
    out
}

/// Handle to a running capture stream. Dropping it stops the stream.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop the stream and join the owning thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start capturing from the named device.
///
/// `on_chunk` is invoked off the audio callback thread's hot path with
/// 1024-frame chunks of 16 kHz mono PCM16 bytes. It must not block.
pub fn start_capture(
    device_name: &str,
    on_chunk: impl Fn(Vec<u8>) + Send + 'static,
) -> Result<CaptureHandle, EngineError> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let name = device_name.to_string();

    // The stream must be built and kept alive on one thread; report the
    // open result back synchronously so callers get a typed error.
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), EngineError>>();

    let worker = thread::Builder::new()
        .name(format!("capture-{name}"))
        .spawn(move || {
            let stream = match build_stream(&name, on_chunk) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while !stop_flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        })
        .map_err(|e| EngineError::DeviceOpen(format!("spawn capture thread: {e}")))?;

    match ready_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(Ok(())) => Ok(CaptureHandle {
            stop,
            worker: Some(worker),
        }),
        Ok(Err(e)) => {
            let _ = worker.join();
            Err(e)
        }
        Err(_) => {
            stop.store(true, Ordering::SeqCst);
            Err(EngineError::DeviceOpen(format!(
                "timed out opening capture device {device_name}"
            )))
        }
    }
}

fn build_stream(
    name: &str,
    on_chunk: impl Fn(Vec<u8>) + Send + 'static,
) -> Result<cpal::Stream, EngineError> {
    let device = input_device_by_name(name)?;

    let native = device
        .default_input_config()
        .map_err(|e| EngineError::DeviceOpen(format!("input config for {name}: {e}")))?;
    let device_rate = native.sample_rate().0;
    let channels = native.channels();

    let config = StreamConfig {
        channels,
        sample_rate: native.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        device = %name,
        device_rate,
        channels,
        target_rate = CAPTURE_SAMPLE_RATE,
        "Opening capture stream"
    );

    let mut pending: Vec<f32> = Vec::with_capacity(CHUNK_FRAMES * 2);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                pending.extend(downmix_resample(data, channels, device_rate));
                while pending.len() >= CHUNK_FRAMES {
                    let rest = pending.split_off(CHUNK_FRAMES);
                    let chunk = std::mem::replace(&mut pending, rest);
                    on_chunk(to_pcm16_bytes(&chunk));
                }
            },
            |err| error!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| EngineError::DeviceOpen(format!("build input stream for {name}: {e}")))?;

    stream
        .play()
        .map_err(|e| EngineError::DeviceOpen(format!("start input stream for {name}: {e}")))?;

    Ok(stream)
}

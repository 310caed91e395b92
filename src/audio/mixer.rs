//! Continuous audio mixer: physical mic → virtual output, with TTS mixing.
//!
//! One dedicated worker owns both cpal streams and runs the soft-real-time
//! loop. Mic audio is captured mono at 48 kHz, up-mixed to stereo, mixed
//! sample-wise with any queued TTS audio, and written to the virtual output
//! so the remote party hears the local voice and every TTS translation.
//!
//! The only shared state is the TTS byte queue behind a single mutex; both
//! the reader (mix loop) and writers (TTS router) hold it briefly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use super::devices::{input_device_by_name, output_device_by_name};
use super::pcm;
use super::ring_buffer::sample_ring_buffer;
use super::{BYTES_PER_SAMPLE, CHUNK_FRAMES, MIXER_CHANNELS, MIXER_SAMPLE_RATE};

/// Notifications from the mixer worker to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerEvent {
    /// The queued TTS audio drained completely (signaled exactly once per
    /// playout).
    TtsFinished,
    /// The loop exited; `fatal` is true when it died on an error rather
    /// than a stop request.
    Stopped { fatal: bool },
}

/// Shared TTS mixing state.
#[derive(Debug, Default)]
pub(crate) struct TtsQueue {
    pub(crate) buffer: Vec<u8>,
    pub(crate) playing: bool,
}

/// One mix-loop iteration over a mono mic chunk.
///
/// Up-mixes to stereo, then under the caller-held queue:
/// - a full stereo chunk of TTS bytes is sliced off and mixed;
/// - a shorter remainder is zero-padded, mixed, and the queue emptied;
/// - an empty queue that was playing flips `playing` off and reports
///   `finished = true` (exactly once).
///
/// Mixing is `clip((mic + tts) / 2)` per sample.
pub(crate) fn mix_step(mono: &[i16], queue: &mut TtsQueue) -> (Vec<i16>, bool) {
    let mut stereo = pcm::upmix_to_stereo(mono);
    let needed = stereo.len() * BYTES_PER_SAMPLE;

    if queue.playing && queue.buffer.len() >= needed {
        let tts = pcm::bytes_to_samples(&queue.buffer[..needed]);
        queue.buffer.drain(..needed);
        for (s, t) in stereo.iter_mut().zip(tts.iter()) {
            *s = pcm::mix_clip(*s, *t);
        }
        (stereo, false)
    } else if queue.playing && !queue.buffer.is_empty() {
        // Buffer running out: pad the tail with silence and empty it.
        let mut tail = std::mem::take(&mut queue.buffer);
        tail.resize(needed, 0);
        let tts = pcm::bytes_to_samples(&tail);
        for (s, t) in stereo.iter_mut().zip(tts.iter()) {
            *s = pcm::mix_clip(*s, *t);
        }
        (stereo, false)
    } else if queue.playing {
        queue.playing = false;
        (stereo, true)
    } else {
        (stereo, false)
    }
}

struct MixerShared {
    running: AtomicBool,
    tts: Mutex<TtsQueue>,
}

/// The process-wide mixer instance. Created by the embedder (via the
/// engine) and handed to the components that need it — no hidden globals.
pub struct AudioMixer {
    shared: Arc<MixerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioMixer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MixerShared {
                running: AtomicBool::new(false),
                tts: Mutex::new(TtsQueue::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the mixer loop. Idempotent: returns `true` if it was already
    /// running. Device open failures happen inside the worker and surface
    /// as a fatal [`MixerEvent::Stopped`].
    pub fn start(
        &self,
        mic_name: &str,
        virtual_out_name: &str,
        events: UnboundedSender<MixerEvent>,
    ) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Audio mixer already running");
            return true;
        }

        let shared = self.shared.clone();
        let mic = mic_name.to_string();
        let out = virtual_out_name.to_string();

        let handle = thread::Builder::new()
            .name("audio-mixer".into())
            .spawn(move || mixer_loop(shared, mic, out, events))
            .expect("spawn mixer thread");

        *self.worker.lock().unwrap() = Some(handle);
        info!("Audio mixer started");
        true
    }

    /// Cooperative shutdown; joins the worker (the loop observes the flag
    /// every chunk, ~21 ms of audio).
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("Audio mixer stopped");
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Append 48 kHz stereo PCM16 bytes to the TTS queue.
    pub fn queue_tts(&self, audio: &[u8]) {
        let mut q = self.shared.tts.lock().unwrap();
        q.buffer.extend_from_slice(audio);
        q.playing = true;
        info!(
            queued = audio.len(),
            total = q.buffer.len(),
            "TTS audio queued for mixing"
        );
    }

    /// True iff TTS audio is queued or mid-playout.
    pub fn is_tts_active(&self) -> bool {
        self.shared.tts.lock().unwrap().playing
    }

    /// Drop any queued TTS audio and end the playout state.
    pub fn clear_tts(&self) {
        let mut q = self.shared.tts.lock().unwrap();
        q.buffer.clear();
        q.playing = false;
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The mixer worker: owns both cpal streams for its whole lifetime and
/// shuttles chunks between them, mixing TTS on the way.
fn mixer_loop(
    shared: Arc<MixerShared>,
    mic_name: String,
    out_name: String,
    events: UnboundedSender<MixerEvent>,
) {
    let fatal = match run_streams(&shared, &mic_name, &out_name, &events) {
        Ok(()) => false,
        Err(e) => {
            error!("Fatal error in mixer loop: {}", e);
            true
        }
    };

    shared.running.store(false, Ordering::SeqCst);
    shared.tts.lock().unwrap().playing = false;
    let _ = events.send(MixerEvent::Stopped { fatal });
    info!("Mixer loop stopped");
}

fn run_streams(
    shared: &Arc<MixerShared>,
    mic_name: &str,
    out_name: &str,
    events: &UnboundedSender<MixerEvent>,
) -> Result<(), String> {
    let mic_device = input_device_by_name(mic_name).map_err(|e| e.to_string())?;
    let out_device = output_device_by_name(out_name).map_err(|e| e.to_string())?;

    let in_config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(MIXER_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };
    let out_config = StreamConfig {
        channels: MIXER_CHANNELS,
        sample_rate: SampleRate(MIXER_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let (mut in_prod, mut in_cons) = sample_ring_buffer(None);
    let (mut out_prod, mut out_cons) = sample_ring_buffer(None);

    let in_stream = mic_device
        .build_input_stream(
            &in_config,
            move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                // Overflow drops the newest samples; the loop catches up.
                let _ = in_prod.push_slice(data);
            },
            |err| error!("Mixer mic stream error: {}", err),
            None,
        )
        .map_err(|e| format!("open mic input stream: {e}"))?;

    let out_stream = out_device
        .build_output_stream(
            &out_config,
            move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                let n = out_cons.pop_slice(data);
                // Underrun: pad with silence rather than stale audio.
                for s in &mut data[n..] {
                    *s = 0;
                }
            },
            |err| error!("Mixer output stream error: {}", err),
            None,
        )
        .map_err(|e| format!("open virtual output stream: {e}"))?;

    in_stream
        .play()
        .map_err(|e| format!("start mic input stream: {e}"))?;
    out_stream
        .play()
        .map_err(|e| format!("start virtual output stream: {e}"))?;

    info!(mic = %mic_name, out = %out_name, "Mixer loop started: mic -> virtual device");

    let mut mono = vec![0i16; CHUNK_FRAMES];

    while shared.running.load(Ordering::SeqCst) {
        if in_cons.available() < CHUNK_FRAMES {
            thread::sleep(Duration::from_millis(10));
            continue;
        }
        in_cons.pop_slice(&mut mono);

        let (chunk, finished) = {
            let mut q = shared.tts.lock().unwrap();
            mix_step(&mono, &mut q)
        };

        // Strictly in-order write; back off briefly while the output ring
        // is full.
        let mut offset = 0;
        while offset < chunk.len() && shared.running.load(Ordering::SeqCst) {
            offset += out_prod.push_slice(&chunk[offset..]);
            if offset < chunk.len() {
                thread::sleep(Duration::from_millis(2));
            }
        }

        if finished {
            info!("TTS mixing complete");
            let _ = events.send(MixerEvent::TtsFinished);
        }
    }

    // Streams close when they drop here, on every exit path.
    Ok(())
}

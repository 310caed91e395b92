//! TTS audio router.
//!
//! Takes a synthesized 16 kHz mono buffer, expands it to the mixer's
//! 48 kHz stereo format, and injects it into the mixer's TTS queue. Can
//! duplicate the audio to the default speakers so the local user hears the
//! translation too. One playback at a time; stop requests are observed at
//! chunk boundaries and polling ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::{info, warn};

use crate::audio::pcm::{bytes_to_samples, expand_16k_mono_to_48k_stereo};
use crate::audio::{AudioMixer, MIXER_CHANNELS, MIXER_SAMPLE_RATE};

/// Local-monitor feed chunk size in bytes.
const MONITOR_CHUNK_BYTES: usize = 4096;

/// Completion-poll interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fired once when playback ends (naturally or cancelled).
pub type PlaybackCallback = Box<dyn FnOnce() + Send + 'static>;

/// Routes buffered TTS audio into the mixer queue.
pub struct TtsRouter {
    mixer: Arc<AudioMixer>,
    local_monitor: bool,
    is_playing: Arc<AtomicBool>,
    stop_signal: Arc<AtomicBool>,
}

impl TtsRouter {
    /// `local_monitor` duplicates playback to the default output device.
    pub fn new(mixer: Arc<AudioMixer>, local_monitor: bool) -> Self {
        Self {
            mixer,
            local_monitor,
            is_playing: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Play a synthesized 16 kHz mono PCM16 buffer through the mixer.
    ///
    /// Rejected when the mixer is not running (fires `on_stopped`) or when
    /// a playback is already in progress. Returns whether playback started.
    pub fn play_audio(
        &self,
        audio_16k_mono: Vec<u8>,
        on_complete: PlaybackCallback,
        on_stopped: PlaybackCallback,
    ) -> bool {
        if !self.mixer.is_running() {
            warn!("Cannot play TTS: mixer not running");
            on_stopped();
            return false;
        }
        if self.is_playing.swap(true, Ordering::SeqCst) {
            warn!("Already playing TTS audio");
            return false;
        }
        self.stop_signal.store(false, Ordering::SeqCst);

        let resampled = expand_16k_mono_to_48k_stereo(&audio_16k_mono);
        info!(
            input = audio_16k_mono.len(),
            resampled = resampled.len(),
            "Routing TTS audio into mixer"
        );
        self.mixer.queue_tts(&resampled);

        let mixer = self.mixer.clone();
        let is_playing = self.is_playing.clone();
        let stop_signal = self.stop_signal.clone();
        let local_monitor = self.local_monitor;

        let spawned = thread::Builder::new().name("tts-router".into()).spawn(move || {
            playback_worker(
                mixer,
                resampled,
                local_monitor,
                is_playing,
                stop_signal,
                on_complete,
                on_stopped,
            );
        });

        if let Err(e) = spawned {
            warn!("Failed to spawn TTS playback worker: {}", e);
            self.mixer.clear_tts();
            self.is_playing.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Request a cooperative stop; the worker observes it at the next
    /// chunk boundary or polling tick.
    pub fn stop_playback(&self) {
        if self.is_playing.load(Ordering::SeqCst) {
            info!("Stopping TTS playback");
            self.stop_signal.store(true, Ordering::SeqCst);
        }
    }

    /// Whether a playback is in progress.
    pub fn is_busy(&self) -> bool {
        self.is_playing.load(Ordering::SeqCst)
    }
}

/// Playback worker: optional local monitoring plus completion polling.
/// The local stream closes on every exit path (scope drop).
fn playback_worker(
    mixer: Arc<AudioMixer>,
    resampled: Vec<u8>,
    local_monitor: bool,
    is_playing: Arc<AtomicBool>,
    stop_signal: Arc<AtomicBool>,
    on_complete: PlaybackCallback,
    on_stopped: PlaybackCallback,
) {
    // Keep the stream alive for the duration of the worker.
    let mut monitor: Option<(OutputStream, Sink)> = None;

    if local_monitor {
        match OutputStream::try_default() {
            Ok((stream, handle)) => match Sink::try_new(&handle) {
                Ok(sink) => {
                    // Feed the sink in small chunks, honoring stop between
                    // chunks.
                    for chunk in resampled.chunks(MONITOR_CHUNK_BYTES) {
                        if stop_signal.load(Ordering::SeqCst) {
                            break;
                        }
                        let samples = bytes_to_samples(chunk);
                        sink.append(SamplesBuffer::new(
                            MIXER_CHANNELS,
                            MIXER_SAMPLE_RATE,
                            samples,
                        ));
                    }
                    monitor = Some((stream, sink));
                }
                Err(e) => warn!("Local monitor sink failed: {}", e),
            },
            Err(e) => warn!("Local monitor output failed: {}", e),
        }
    }

    // Wait for the mixer to drain the queued audio.
    loop {
        if stop_signal.load(Ordering::SeqCst) || !mixer.is_running() {
            mixer.clear_tts();
            if let Some((_, ref sink)) = monitor {
                sink.stop();
            }
            is_playing.store(false, Ordering::SeqCst);
            info!("TTS playback stopped");
            on_stopped();
            return;
        }
        if !mixer.is_tts_active() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    is_playing.store(false, Ordering::SeqCst);
    info!(bytes = resampled.len(), "TTS playback complete");
    on_complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_rejects_when_mixer_not_running() {
        let mixer = Arc::new(AudioMixer::new());
        let router = TtsRouter::new(mixer, false);

        let (tx, rx) = mpsc::channel();
        let started = router.play_audio(
            vec![0u8; 320],
            Box::new(|| panic!("must not complete")),
            Box::new(move || tx.send(()).unwrap()),
        );

        assert!(!started);
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!router.is_busy());
    }

    #[test]
    fn test_stop_without_playback_is_noop() {
        let mixer = Arc::new(AudioMixer::new());
        let router = TtsRouter::new(mixer, false);
        router.stop_playback();
        assert!(!router.is_busy());
    }
}

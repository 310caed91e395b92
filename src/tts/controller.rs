//! Translation TTS controller.
//!
//! Coordinates the synthesis buffer and the router behind a four-state
//! machine. One global transition lock guards the state; observer
//! callbacks always fire outside the critical section.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::buffer::TtsBuffer;
use super::router::TtsRouter;

/// Playback pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsState {
    /// Nothing buffered, nothing playing.
    Idle,
    /// Synthesis in flight.
    Buffering,
    /// Audio buffered and ready to speak.
    Ready,
    /// Audio playing through the router.
    Speaking,
}

impl std::fmt::Display for TtsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Buffering => write!(f, "buffering"),
            Self::Ready => write!(f, "ready"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

type StateCallback = Box<dyn Fn(TtsState) + Send + Sync + 'static>;

/// Coordinates buffer + router and owns the playback state.
pub struct TranslationTtsController {
    buffer: Arc<TtsBuffer>,
    router: Arc<TtsRouter>,
    state: Mutex<TtsState>,
    on_state_change: Mutex<Option<StateCallback>>,
}

impl TranslationTtsController {
    pub fn new(buffer: Arc<TtsBuffer>, router: Arc<TtsRouter>) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            router,
            state: Mutex::new(TtsState::Idle),
            on_state_change: Mutex::new(None),
        })
    }

    /// Register the state-change observer; it fires on every transition.
    pub fn set_on_state_change(&self, callback: impl Fn(TtsState) + Send + Sync + 'static) {
        *self.on_state_change.lock().unwrap() = Some(Box::new(callback));
    }

    /// Set the target language for synthesized speech.
    pub fn set_language(&self, language_name: &str) {
        self.buffer.set_voice_by_language(language_name, None);
    }

    /// Buffer a translated text: kicks off synthesis and moves to
    /// Buffering; the synthesis outcome lands in Ready or back in Idle.
    pub fn add_translation(self: &Arc<Self>, text: &str) {
        if text.trim().is_empty() {
            warn!("Empty translation text, skipping");
            return;
        }

        self.set_state(TtsState::Buffering);

        let this = self.clone();
        self.buffer.generate_async(
            text,
            Box::new(move |success, _message| {
                if success {
                    this.set_state(TtsState::Ready);
                } else {
                    this.set_state(TtsState::Idle);
                }
            }),
        );
    }

    /// Speak the buffered audio through the router. Returns whether
    /// playback started.
    pub fn speak(self: &Arc<Self>) -> bool {
        let audio = {
            let state = self.state.lock().unwrap();
            if !self.buffer.has_audio() {
                warn!("No audio in buffer to speak");
                return false;
            }
            if *state == TtsState::Speaking {
                warn!("Already speaking");
                return false;
            }
            self.buffer.buffer()
        };

        self.set_state(TtsState::Speaking);

        let complete = self.clone();
        let stopped = self.clone();
        let started = self.router.play_audio(
            audio,
            Box::new(move || {
                complete.buffer.clear();
                complete.set_state(TtsState::Idle);
            }),
            Box::new(move || {
                stopped.buffer.clear();
                stopped.set_state(TtsState::Idle);
            }),
        );

        if !started {
            // The router already fired on_stopped (or rejected a duplicate
            // playback); make sure we are not stuck in Speaking.
            self.set_state(TtsState::Idle);
        }
        started
    }

    /// Stop playback and drop the buffered audio.
    pub fn stop(&self) {
        self.router.stop_playback();
        self.buffer.clear();
        self.set_state(TtsState::Idle);
    }

    /// Drop buffered audio without touching an in-progress playback.
    pub fn clear_buffer(&self) {
        self.buffer.clear();
        if self.state() != TtsState::Speaking {
            self.set_state(TtsState::Idle);
        }
    }

    pub fn state(&self) -> TtsState {
        *self.state.lock().unwrap()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == TtsState::Ready
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == TtsState::Speaking
    }

    /// Busy means buffering or speaking.
    pub fn is_busy(&self) -> bool {
        matches!(self.state(), TtsState::Buffering | TtsState::Speaking)
    }

    fn set_state(&self, new_state: TtsState) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            if *state != new_state {
                let old = *state;
                *state = new_state;
                info!(from = %old, to = %new_state, "TTS state transition");
                true
            } else {
                false
            }
        };

        // Observer fires outside the critical section.
        if changed {
            if let Some(cb) = self.on_state_change.lock().unwrap().as_ref() {
                cb(new_state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioMixer;
    use crate::tts::voices::VoiceTable;
    use crate::tts::Synthesizer;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    struct FakeSynth {
        fail: bool,
    }

    impl Synthesizer for FakeSynth {
        fn synthesize(
            &self,
            _text: &str,
            _voice: &str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + '_>> {
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    anyhow::bail!("boom");
                }
                Ok(vec![1u8; 640])
            })
        }

        fn name(&self) -> String {
            "fake".into()
        }
    }

    fn controller_with(fail: bool) -> (Arc<TranslationTtsController>, Arc<AudioMixer>) {
        let mixer = Arc::new(AudioMixer::new());
        let buffer = Arc::new(TtsBuffer::new(
            Arc::new(FakeSynth { fail }),
            VoiceTable::default(),
        ));
        let router = Arc::new(TtsRouter::new(mixer.clone(), false));
        (TranslationTtsController::new(buffer, router), mixer)
    }

    async fn wait_for_state(
        controller: &Arc<TranslationTtsController>,
        want: TtsState,
    ) {
        for _ in 0..50 {
            if controller.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "controller never reached {want}, stuck at {}",
            controller.state()
        );
    }

    #[tokio::test]
    async fn test_add_translation_reaches_ready() {
        let (controller, _mixer) = controller_with(false);
        let states = Arc::new(Mutex::new(Vec::new()));
        let observed = states.clone();
        controller.set_on_state_change(move |s| observed.lock().unwrap().push(s));

        assert_eq!(controller.state(), TtsState::Idle);
        controller.add_translation("Bonjour");
        wait_for_state(&controller, TtsState::Ready).await;

        assert!(controller.is_ready());
        assert!(!controller.is_busy());
        assert_eq!(
            *states.lock().unwrap(),
            vec![TtsState::Buffering, TtsState::Ready]
        );
    }

    #[tokio::test]
    async fn test_failed_synthesis_returns_to_idle() {
        let (controller, _mixer) = controller_with(true);
        controller.add_translation("Bonjour");
        assert!(controller.is_busy()); // Buffering
        wait_for_state(&controller, TtsState::Idle).await;
        assert!(!controller.is_ready());
    }

    #[tokio::test]
    async fn test_empty_translation_is_ignored() {
        let (controller, _mixer) = controller_with(false);
        controller.add_translation("   ");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.state(), TtsState::Idle);
    }

    #[tokio::test]
    async fn test_speak_without_mixer_falls_back_to_idle() {
        // The router rejects playback while the mixer is stopped; the
        // controller must not get stuck in Speaking.
        let (controller, _mixer) = controller_with(false);
        controller.add_translation("Bonjour");
        wait_for_state(&controller, TtsState::Ready).await;

        assert!(!controller.speak());
        wait_for_state(&controller, TtsState::Idle).await;
        // Stop path clears the buffer.
        assert!(!controller.buffer.has_audio());
    }

    #[tokio::test]
    async fn test_speak_with_empty_buffer_is_rejected() {
        let (controller, _mixer) = controller_with(false);
        assert!(!controller.speak());
        assert_eq!(controller.state(), TtsState::Idle);
    }

    #[tokio::test]
    async fn test_stop_from_any_state_reaches_idle() {
        let (controller, _mixer) = controller_with(false);

        controller.stop();
        assert_eq!(controller.state(), TtsState::Idle);

        controller.add_translation("Bonjour");
        wait_for_state(&controller, TtsState::Ready).await;
        controller.stop();
        assert_eq!(controller.state(), TtsState::Idle);
        assert!(!controller.buffer.has_audio());
    }

    #[tokio::test]
    async fn test_clear_buffer_outside_speaking() {
        let (controller, _mixer) = controller_with(false);
        controller.add_translation("Bonjour");
        wait_for_state(&controller, TtsState::Ready).await;

        controller.clear_buffer();
        assert_eq!(controller.state(), TtsState::Idle);
        assert!(!controller.buffer.has_audio());
    }
}

//! In-memory TTS synthesis buffer.
//!
//! Accepts text, synthesizes it with the configured voice, and appends the
//! raw PCM to a shared byte buffer. At most one synthesis is in flight at a
//! time; the synthesis mutex serializes callers rather than rejecting them.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::voices::VoiceTable;
use super::Synthesizer;

/// Fallback voice when none has been selected yet.
const DEFAULT_VOICE: &str = "en-US-JennyNeural";

/// Completion callback: `(success, message)`.
pub type GenerateCallback = Box<dyn FnOnce(bool, String) + Send + 'static>;

/// Buffered speech synthesis with voice selection.
pub struct TtsBuffer {
    synthesizer: Arc<dyn Synthesizer>,
    voices: VoiceTable,
    current_voice: Mutex<String>,
    audio: Mutex<Vec<u8>>,
    /// Serializes synthesis: exactly one in flight.
    synthesis: Arc<tokio::sync::Mutex<()>>,
}

impl TtsBuffer {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, voices: VoiceTable) -> Self {
        Self {
            synthesizer,
            voices,
            current_voice: Mutex::new(DEFAULT_VOICE.to_string()),
            audio: Mutex::new(Vec::new()),
            synthesis: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Resolve a friendly language name (plus optional sex preference) to a
    /// provider voice and make it current. Unknown languages are ignored
    /// with a warning.
    pub fn set_voice_by_language(&self, language_name: &str, sex: Option<&str>) {
        let Some(code) = self.voices.language_code(language_name) else {
            warn!(language = %language_name, "Language not found in voice table");
            return;
        };
        match self.voices.voice(code, sex) {
            Some(voice) => {
                info!(voice = %voice.name, code, "TTS voice selected");
                *self.current_voice.lock().unwrap() = voice.name.clone();
            }
            None => warn!(language = %language_name, "No voice found for language"),
        }
    }

    /// The currently selected provider voice.
    pub fn current_voice(&self) -> String {
        self.current_voice.lock().unwrap().clone()
    }

    /// Kick off asynchronous synthesis; the result is appended to the
    /// shared buffer and the callback fires with the outcome. A failed
    /// synthesis leaves the buffer untouched.
    pub fn generate_async(self: &Arc<Self>, text: &str, on_complete: GenerateCallback) {
        let this = self.clone();
        let text = text.to_string();

        tokio::spawn(async move {
            let _guard = this.synthesis.lock().await;
            let voice = this.current_voice();

            match this.synthesizer.synthesize(&text, &voice).await {
                Ok(pcm) => {
                    let total = {
                        let mut audio = this.audio.lock().unwrap();
                        audio.extend_from_slice(&pcm);
                        audio.len()
                    };
                    info!(generated = pcm.len(), total, "TTS audio buffered");
                    on_complete(true, "TTS generation successful".into());
                }
                Err(e) => {
                    warn!("TTS generation error: {}", e);
                    on_complete(false, format!("TTS generation error: {e}"));
                }
            }
        });
    }

    /// Snapshot of the buffered audio.
    pub fn buffer(&self) -> Vec<u8> {
        self.audio.lock().unwrap().clone()
    }

    /// Buffered byte count.
    pub fn buffer_size(&self) -> usize {
        self.audio.lock().unwrap().len()
    }

    /// Whether any audio is buffered.
    pub fn has_audio(&self) -> bool {
        !self.audio.lock().unwrap().is_empty()
    }

    /// Drop all buffered audio.
    pub fn clear(&self) {
        let mut audio = self.audio.lock().unwrap();
        let old = audio.len();
        audio.clear();
        if old > 0 {
            info!(removed = old, "TTS buffer cleared");
        }
    }
}

//! Streaming speech-to-text.
//!
//! A `Recognizer` owns the provider connection and delivers raw
//! `RecognitionEvent`s; one `SttSession` per audio source applies the
//! display rules on top: speaker relabeling, consecutive-duplicate
//! suppression, and language-change side events.

pub mod azure;

use tokio::sync::mpsc;
use tracing::warn;

use crate::transcript::Source;

/// Raw events from a streaming recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Partial hypothesis, subject to replacement.
    Interim {
        text: String,
        speaker_id: Option<String>,
        language: Option<String>,
    },
    /// Final phrase.
    Final {
        text: String,
        speaker_id: Option<String>,
        language: Option<String>,
    },
    /// The provider cancelled with an error; the stream keeps going.
    Canceled { message: String },
}

/// Handle to a running recognition stream.
pub struct RecognizerHandle {
    audio_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: tokio::task::JoinHandle<()>,
}

impl RecognizerHandle {
    pub(crate) fn new(
        audio_tx: mpsc::UnboundedSender<Vec<u8>>,
        task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            audio_tx: Some(audio_tx),
            task,
        }
    }

    /// A cloneable sender for the capture callback. Sending never blocks.
    pub fn audio_sender(&self) -> mpsc::UnboundedSender<Vec<u8>> {
        self.audio_tx
            .as_ref()
            .expect("recognizer handle already stopped")
            .clone()
    }

    /// Push one chunk of 16 kHz mono PCM16 bytes.
    pub fn push_pcm(&self, pcm: &[u8]) {
        if let Some(tx) = &self.audio_tx {
            let _ = tx.send(pcm.to_vec());
        }
    }

    /// Close the audio stream and wait briefly for the worker to drain.
    pub async fn stop(mut self) {
        self.audio_tx.take();
        if tokio::time::timeout(std::time::Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            warn!("Recognizer worker did not drain in time; aborting");
            self.task.abort();
        }
    }
}

/// A streaming recognition provider.
pub trait Recognizer: Send + Sync {
    /// Start a recognition stream delivering events on `events`. Audio is
    /// pushed through the returned handle.
    fn start(
        &self,
        source_label: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> anyhow::Result<RecognizerHandle>;
}

/// Post-recognition events produced by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Interim {
        text: String,
        source: Source,
        /// Display label; `…` when diarization has not attributed yet.
        speaker: String,
    },
    Final {
        text: String,
        source: Source,
        speaker: Option<String>,
    },
    LanguageChanged {
        language: String,
        source: Source,
    },
    /// Transient recognizer error (logged, session continues).
    Error {
        message: String,
    },
}

/// Re-render a provider speaker id for display: `Guest-N` becomes
/// `Speaker N`; anything else passes through.
fn relabel_speaker(speaker_id: &str) -> String {
    match speaker_id.strip_prefix("Guest-") {
        Some(n) => format!("Speaker {n}"),
        None => speaker_id.to_string(),
    }
}

/// Per-source session state on top of a recognizer stream.
#[derive(Debug)]
pub struct SttSession {
    source: Source,
    last_final: Option<(String, String)>,
    current_language: Option<String>,
}

impl SttSession {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            last_final: None,
            current_language: None,
        }
    }

    /// Map one raw recognizer event to session events, in order.
    pub fn handle(&mut self, event: RecognitionEvent) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        match event {
            RecognitionEvent::Interim {
                text,
                speaker_id,
                language,
            } => {
                if text.trim().is_empty() {
                    return out;
                }
                self.note_language(language, &mut out);
                let speaker = speaker_id
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(relabel_speaker)
                    .unwrap_or_else(|| "…".to_string());
                out.push(SessionEvent::Interim {
                    text,
                    source: self.source,
                    speaker,
                });
            }
            RecognitionEvent::Final {
                text,
                speaker_id,
                language,
            } => {
                if text.trim().is_empty() {
                    return out;
                }
                self.note_language(language, &mut out);

                let speaker = speaker_id
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(relabel_speaker);

                // Suppress consecutive duplicate finals for the same
                // (speaker, text) pair.
                let key = (speaker.clone().unwrap_or_default(), text.clone());
                if self.last_final.as_ref() == Some(&key) {
                    return out;
                }
                self.last_final = Some(key);

                out.push(SessionEvent::Final {
                    text,
                    source: self.source,
                    speaker,
                });
            }
            RecognitionEvent::Canceled { message } => {
                out.push(SessionEvent::Error { message });
            }
        }

        out
    }

    fn note_language(&mut self, language: Option<String>, out: &mut Vec<SessionEvent>) {
        if let Some(lang) = language {
            if self.current_language.as_deref() != Some(lang.as_str()) {
                self.current_language = Some(lang.clone());
                out.push(SessionEvent::LanguageChanged {
                    language: lang,
                    source: self.source,
                });
            }
        }
    }
}

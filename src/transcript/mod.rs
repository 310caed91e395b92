//! Transcript domain types and the components that consolidate them.

pub mod arbiter;
pub mod logger;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Where an utterance was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    /// The physical microphone (the local speaker).
    Mic,
    /// The system-audio loopback (remote participants).
    System,
    /// A local TTS playout re-captured from the loopback.
    Tts,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mic => write!(f, "MIC"),
            Self::System => write!(f, "SYSTEM"),
            Self::Tts => write!(f, "TTS"),
        }
    }
}

/// Display label attached to reclassified TTS captures.
pub const TTS_SPEAKER_LABEL: &str = "🌍 Translated";

/// One recognized text emission.
#[derive(Debug, Clone, Serialize)]
pub struct Utterance {
    pub text: String,
    pub source: Source,
    /// `Speaker N` display label, when diarization attributed one.
    pub speaker_id: Option<String>,
    pub timestamp: DateTime<Local>,
    /// Final results supersede any pending interim for the same
    /// `(source, speaker)` key.
    pub is_final: bool,
}

impl Utterance {
    pub fn final_result(text: impl Into<String>, source: Source, speaker_id: Option<String>) -> Self {
        Self {
            text: text.into(),
            source,
            speaker_id,
            timestamp: Local::now(),
            is_final: true,
        }
    }

    pub fn interim(text: impl Into<String>, source: Source, speaker_id: Option<String>) -> Self {
        Self {
            text: text.into(),
            source,
            speaker_id,
            timestamp: Local::now(),
            is_final: false,
        }
    }
}

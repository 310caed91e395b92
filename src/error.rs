//! Error taxonomy and warning accumulation.
//!
//! Startup/configuration failures surface as `EngineError` from the engine
//! operations. Runtime failures inside workers never propagate — they are
//! converted to `Warning` events and counted here so the embedder can
//! display and clear them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no physical microphone device found")]
    NoPhysicalMic,

    #[error("no virtual output device found (install BlackHole or VB-CABLE)")]
    NoVirtualDevice,

    #[error("failed to open audio device: {0}")]
    DeviceOpen(String),

    #[error("audio mixer is not running")]
    MixerNotRunning,

    #[error("transcription is already running")]
    AlreadyRunning,

    #[error("transcription is not running")]
    NotRunning,

    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of non-fatal runtime failures.
///
/// Each variant maps onto one warning counter bucket; the failing
/// side-channel pauses for the affected item while the transcript stream
/// continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// The recognizer emitted a cancellation with error; session continues.
    SttTransient,
    /// LLM call failed to connect.
    LlmConnection,
    /// LLM call timed out.
    LlmTimeout,
    /// Any other LLM failure (bad status, malformed body).
    LlmOther,
    /// Speech synthesis failed; the item is dropped.
    TtsFailure,
    /// The mixer loop exited on a fatal error.
    MixerFatal,
    /// Insight JSON response could not be parsed.
    ParseError,
}

/// Accumulated warnings with a last-message pointer.
///
/// Shared between all workers; the embedder reads the snapshot and may
/// clear it at any time.
#[derive(Debug, Default)]
pub struct Warnings {
    count: AtomicU64,
    last: Mutex<Option<(WarningKind, String)>>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning. Returns the new total count.
    pub fn record(&self, kind: WarningKind, message: impl Into<String>) -> u64 {
        let message = message.into();
        tracing::warn!(?kind, %message, "engine warning");
        *self.last.lock().unwrap() = Some((kind, message));
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total number of warnings since the last clear.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// The most recent warning, if any.
    pub fn last(&self) -> Option<(WarningKind, String)> {
        self.last.lock().unwrap().clone()
    }

    /// Reset the counter and the last-warning pointer.
    pub fn clear(&self) {
        self.count.store(0, Ordering::Relaxed);
        *self.last.lock().unwrap() = None;
    }
}

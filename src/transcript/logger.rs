//! Append-only transcript and system-event logs.
//!
//! Two files per session: the conversation log (final transcriptions only)
//! and the system-events log (capture starts/stops, feature toggles,
//! provider calls, language changes). Interim results are never written to
//! disk — the logger only tracks them so a final can clear the pending
//! interim for its `(source, speaker)` key.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

use super::Source;

const DEFAULT_CONVERSATION_LOG: &str = "transcriptions.log";
const SYSTEM_EVENTS_LOG: &str = "system_events.log";

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Writers for the per-session conversation and system-event logs.
#[derive(Debug)]
pub struct TranscriptLogger {
    conversation_name: String,
    base_dir: PathBuf,
    pending_interims: HashMap<(Source, String), String>,
}

impl TranscriptLogger {
    /// `log_file` overrides the conversation log file name. Until a
    /// session directory is set, files land lazily under `logs/`.
    pub fn new(log_file: Option<&str>) -> Self {
        Self {
            conversation_name: log_file.unwrap_or(DEFAULT_CONVERSATION_LOG).to_string(),
            base_dir: PathBuf::from("logs"),
            pending_interims: HashMap::new(),
        }
    }

    /// Redirect new writes into the session directory.
    pub fn set_session_dir(&mut self, dir: &Path) {
        self.base_dir = dir.to_path_buf();
    }

    fn conversation_path(&self) -> PathBuf {
        self.base_dir.join(&self.conversation_name)
    }

    fn system_events_path(&self) -> PathBuf {
        self.base_dir.join(SYSTEM_EVENTS_LOG)
    }

    fn append(&self, path: &Path, line: &str) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Could not create log directory {}: {}", parent.display(), e);
                return;
            }
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!("Could not write log line to {}: {}", path.display(), e);
        }
    }

    /// Write a final transcription to the conversation log.
    pub fn log_transcription(&self, text: &str, source: Source, speaker: Option<&str>) {
        if text.is_empty() {
            return;
        }
        let speaker_part = speaker.map(|s| format!("[{s}]")).unwrap_or_default();
        let line = format!("[{}] [{}]{} {}", timestamp(), source, speaker_part, text);
        self.append(&self.conversation_path(), &line);
    }

    /// Write a detected-language change to the conversation log.
    pub fn log_language_change(&self, language: &str, source: Option<Source>) {
        let name = match language {
            "en-US" => "🇺🇸 English",
            "ru-RU" => "🇷🇺 Russian",
            "tr-TR" => "🇹🇷 Turkish",
            other => other,
        };
        let mut line = format!("[{}] [LANG] {}", timestamp(), name);
        if let Some(source) = source {
            line.push_str(&format!(" [{source}]"));
        }
        self.append(&self.conversation_path(), &line);
    }

    /// Write an event to the system-events log.
    pub fn log_event(&self, message: &str) {
        let line = format!("[{}] [SYSTEM] {}", timestamp(), message);
        self.append(&self.system_events_path(), &line);
    }

    /// Track a pending interim result for its `(source, speaker)` key.
    /// Interims are display-only — nothing is written here.
    pub fn note_interim(&mut self, source: Source, speaker: &str, text: &str) {
        self.pending_interims
            .insert((source, speaker.to_string()), text.to_string());
    }

    /// A final arrived: drop the pending interim for its key, returning it
    /// so the embedder can clear the display line.
    pub fn clear_interim(&mut self, source: Source, speaker: &str) -> Option<String> {
        self.pending_interims.remove(&(source, speaker.to_string()))
    }

    /// Drain every pending interim (used on stop to flush the display).
    pub fn take_pending_interims(&mut self) -> Vec<(Source, String, String)> {
        self.pending_interims
            .drain()
            .map(|((source, speaker), text)| (source, speaker, text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcription_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = TranscriptLogger::new(None);
        logger.set_session_dir(dir.path());

        logger.log_transcription("Hello there.", Source::Mic, Some("Speaker 1"));
        logger.log_transcription("Reply.", Source::System, None);

        let contents = std::fs::read_to_string(dir.path().join("transcriptions.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[MIC][Speaker 1] Hello there."));
        assert!(lines[1].contains("[SYSTEM] Reply."));
    }

    #[test]
    fn test_system_events_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = TranscriptLogger::new(None);
        logger.set_session_dir(dir.path());

        logger.log_event("Transcription started");
        logger.log_transcription("Spoken words.", Source::Mic, None);

        let events = std::fs::read_to_string(dir.path().join("system_events.log")).unwrap();
        assert!(events.contains("[SYSTEM] Transcription started"));
        assert!(!events.contains("Spoken words."));
    }

    #[test]
    fn test_language_change_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = TranscriptLogger::new(None);
        logger.set_session_dir(dir.path());

        logger.log_language_change("ru-RU", Some(Source::System));
        let contents = std::fs::read_to_string(dir.path().join("transcriptions.log")).unwrap();
        assert!(contents.contains("[LANG]"));
        assert!(contents.contains("Russian"));
        assert!(contents.contains("[SYSTEM]"));
    }

    #[test]
    fn test_custom_log_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = TranscriptLogger::new(Some("meeting.log"));
        logger.set_session_dir(dir.path());

        logger.log_transcription("Line.", Source::Mic, None);
        assert!(dir.path().join("meeting.log").exists());
    }

    #[test]
    fn test_interim_tracking() {
        let mut logger = TranscriptLogger::new(None);

        logger.note_interim(Source::Mic, "Speaker 1", "Hel");
        logger.note_interim(Source::Mic, "Speaker 1", "Hello wor");
        logger.note_interim(Source::System, "Speaker 2", "Other");

        // Final for (MIC, Speaker 1) clears only that key.
        let cleared = logger.clear_interim(Source::Mic, "Speaker 1");
        assert_eq!(cleared.as_deref(), Some("Hello wor"));
        assert!(logger.clear_interim(Source::Mic, "Speaker 1").is_none());

        let remaining = logger.take_pending_interims();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1, "Speaker 2");
    }
}

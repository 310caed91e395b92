//! Engine configuration.
//!
//! The embedder supplies provider endpoints/keys and feature defaults
//! through `EngineConfig`, either built directly, deserialized from JSON,
//! or read from the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

fn default_speech_language() -> String {
    "auto".to_string()
}

fn default_candidate_languages() -> Vec<String> {
    vec!["en-US".into(), "ru-RU".into(), "tr-TR".into()]
}

fn default_true() -> bool {
    true
}

fn default_min_speakers() -> u32 {
    2
}

fn default_max_speakers() -> u32 {
    10
}

fn default_auto_pause_secs() -> u64 {
    60
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Speech service subscription key.
    #[serde(default)]
    pub stt_key: String,
    /// Speech service region (e.g. "westeurope").
    #[serde(default)]
    pub stt_region: String,

    /// Chat-completions endpoint base URL.
    #[serde(default)]
    pub llm_endpoint: String,
    /// Chat-completions API key.
    #[serde(default)]
    pub llm_key: String,
    /// API version query parameter.
    #[serde(default)]
    pub llm_api_version: String,
    /// Model/deployment name.
    #[serde(default)]
    pub llm_model: String,

    /// Recognition language code, or "auto" for continuous identification.
    #[serde(default = "default_speech_language")]
    pub speech_language: String,
    /// Candidate languages for auto detection.
    #[serde(default = "default_candidate_languages")]
    pub candidate_languages: Vec<String>,

    /// Request speaker diarization from the recognizer.
    #[serde(default = "default_true")]
    pub enable_diarization: bool,
    #[serde(default = "default_min_speakers")]
    pub min_speakers: u32,
    #[serde(default = "default_max_speakers")]
    pub max_speakers: u32,

    /// Conversation log file name (placed inside the session directory).
    #[serde(default)]
    pub log_file: Option<String>,

    /// Seconds of silence before auto-pause fires.
    #[serde(default = "default_auto_pause_secs")]
    pub auto_pause_silence_duration: u64,
    /// Enable the auto-pause monitor.
    #[serde(default = "default_true")]
    pub enable_auto_pause: bool,

    /// Base directory for per-session artifacts.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// Duplicate the TTS audio to the default speakers for monitoring.
    #[serde(default)]
    pub tts_local_monitor: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stt_key: String::new(),
            stt_region: String::new(),
            llm_endpoint: String::new(),
            llm_key: String::new(),
            llm_api_version: String::new(),
            llm_model: String::new(),
            speech_language: default_speech_language(),
            candidate_languages: default_candidate_languages(),
            enable_diarization: true,
            min_speakers: default_min_speakers(),
            max_speakers: default_max_speakers(),
            log_file: None,
            auto_pause_silence_duration: default_auto_pause_secs(),
            enable_auto_pause: true,
            sessions_dir: default_sessions_dir(),
            tts_local_monitor: false,
        }
    }
}

impl EngineConfig {
    /// Build a config from environment variables.
    ///
    /// Unset variables fall back to the defaults; malformed numeric or
    /// boolean values are warned about and ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("STT_KEY") {
            cfg.stt_key = v;
        }
        if let Ok(v) = std::env::var("STT_REGION") {
            cfg.stt_region = v;
        }
        if let Ok(v) = std::env::var("LLM_ENDPOINT") {
            cfg.llm_endpoint = v;
        }
        if let Ok(v) = std::env::var("LLM_KEY") {
            cfg.llm_key = v;
        }
        if let Ok(v) = std::env::var("LLM_API_VERSION") {
            cfg.llm_api_version = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            cfg.llm_model = v;
        }
        if let Ok(v) = std::env::var("SPEECH_LANGUAGE") {
            cfg.speech_language = v;
        }
        if let Ok(v) = std::env::var("CANDIDATE_LANGUAGES") {
            let langs: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !langs.is_empty() {
                cfg.candidate_languages = langs;
            }
        }
        if let Ok(v) = std::env::var("ENABLE_DIARIZATION") {
            cfg.enable_diarization = parse_bool(&v, "ENABLE_DIARIZATION", cfg.enable_diarization);
        }
        if let Ok(v) = std::env::var("MIN_SPEAKERS") {
            cfg.min_speakers = parse_num(&v, "MIN_SPEAKERS", cfg.min_speakers);
        }
        if let Ok(v) = std::env::var("MAX_SPEAKERS") {
            cfg.max_speakers = parse_num(&v, "MAX_SPEAKERS", cfg.max_speakers);
        }
        if let Ok(v) = std::env::var("LOG_FILE") {
            cfg.log_file = Some(v);
        }
        if let Ok(v) = std::env::var("AUTO_PAUSE_SILENCE_DURATION") {
            cfg.auto_pause_silence_duration =
                parse_num(&v, "AUTO_PAUSE_SILENCE_DURATION", cfg.auto_pause_silence_duration);
        }
        if let Ok(v) = std::env::var("ENABLE_AUTO_PAUSE") {
            cfg.enable_auto_pause = parse_bool(&v, "ENABLE_AUTO_PAUSE", cfg.enable_auto_pause);
        }

        cfg
    }

    /// Read a JSON config file, falling back to defaults on any failure.
    pub fn from_json_file(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {}", path.display(), e);
                }
                Self::default()
            }
        }
    }
}

fn parse_bool(v: &str, key: &str, fallback: bool) -> bool {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!("Ignoring invalid boolean for {}: {:?}", key, other);
            fallback
        }
    }
}

fn parse_num<T: std::str::FromStr + Copy>(v: &str, key: &str, fallback: T) -> T {
    match v.parse() {
        Ok(n) => n,
        Err(_) => {
            warn!("Ignoring invalid number for {}: {:?}", key, v);
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.speech_language, "auto");
        assert_eq!(cfg.candidate_languages.len(), 3);
        assert!(cfg.enable_diarization);
        assert_eq!(cfg.auto_pause_silence_duration, 60);
        assert_eq!(cfg.sessions_dir, PathBuf::from("sessions"));
    }

    #[test]
    fn test_json_roundtrip() {
        let json = r#"{
            "stt_key": "abc",
            "stt_region": "westeurope",
            "speech_language": "en-US",
            "max_speakers": 4
        }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stt_key, "abc");
        assert_eq!(cfg.speech_language, "en-US");
        assert_eq!(cfg.max_speakers, 4);
        // Unspecified fields take defaults
        assert_eq!(cfg.min_speakers, 2);
        assert!(cfg.enable_auto_pause);
    }

    #[test]
    fn test_parse_bool_fallback() {
        assert!(parse_bool("true", "X", false));
        assert!(!parse_bool("off", "X", true));
        assert!(parse_bool("banana", "X", true));
    }
}

//! Declarative TTS voice table.
//!
//! Maps BCP-47 language codes to provider voices with a sex attribute.
//! Lookups are pure functions of the loaded table; no I/O at runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One provider voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    /// Provider voice identifier (e.g. "en-US-JennyNeural").
    pub name: String,
    /// "female" or "male".
    pub sex: String,
}

/// Voices for one language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageVoices {
    /// Friendly language name ("English").
    pub language: String,
    /// Voices in preference order.
    pub voices: Vec<Voice>,
}

/// The loaded voice table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTable {
    languages: HashMap<String, LanguageVoices>,
}

impl Default for VoiceTable {
    /// Built-in table covering the supported meeting languages.
    fn default() -> Self {
        let mut languages = HashMap::new();
        languages.insert(
            "en-US".to_string(),
            LanguageVoices {
                language: "English".into(),
                voices: vec![
                    Voice { name: "en-US-JennyNeural".into(), sex: "female".into() },
                    Voice { name: "en-US-GuyNeural".into(), sex: "male".into() },
                ],
            },
        );
        languages.insert(
            "ru-RU".to_string(),
            LanguageVoices {
                language: "Russian".into(),
                voices: vec![
                    Voice { name: "ru-RU-SvetlanaNeural".into(), sex: "female".into() },
                    Voice { name: "ru-RU-DmitryNeural".into(), sex: "male".into() },
                ],
            },
        );
        languages.insert(
            "tr-TR".to_string(),
            LanguageVoices {
                language: "Turkish".into(),
                voices: vec![
                    Voice { name: "tr-TR-EmelNeural".into(), sex: "female".into() },
                    Voice { name: "tr-TR-AhmetNeural".into(), sex: "male".into() },
                ],
            },
        );
        Self { languages }
    }
}

impl VoiceTable {
    /// Load a table from a JSON file, falling back to the built-in table
    /// on any failure.
    pub fn from_json_file(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(table) => table,
                Err(e) => {
                    warn!("Failed to parse voice table {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read voice table {}: {}", path.display(), e);
                }
                Self::default()
            }
        }
    }

    /// Map a friendly language name to its code, case-insensitively.
    pub fn language_code(&self, friendly_name: &str) -> Option<&str> {
        let lower = friendly_name.to_lowercase();
        match lower.as_str() {
            "english" => Some("en-US"),
            "russian" => Some("ru-RU"),
            "turkish" => Some("tr-TR"),
            _ => None,
        }
    }

    /// First voice for the language matching the sex preference, falling
    /// back to the first voice; `None` when the language has none.
    pub fn voice(&self, language_code: &str, sex: Option<&str>) -> Option<&Voice> {
        let entry = self.languages.get(language_code)?;
        if let Some(pref) = sex {
            if let Some(v) = entry
                .voices
                .iter()
                .find(|v| v.sex.eq_ignore_ascii_case(pref))
            {
                return Some(v);
            }
        }
        entry.voices.first()
    }

    /// Available languages: code → friendly name.
    pub fn available_languages(&self) -> HashMap<String, String> {
        self.languages
            .iter()
            .filter(|(_, e)| !e.voices.is_empty())
            .map(|(code, e)| (code.clone(), e.language.clone()))
            .collect()
    }

    /// All voices for a language, in preference order.
    pub fn voices_for(&self, language_code: &str) -> &[Voice] {
        self.languages
            .get(language_code)
            .map(|e| e.voices.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code_mapping() {
        let table = VoiceTable::default();
        assert_eq!(table.language_code("English"), Some("en-US"));
        assert_eq!(table.language_code("RUSSIAN"), Some("ru-RU"));
        assert_eq!(table.language_code("turkish"), Some("tr-TR"));
        assert_eq!(table.language_code("Klingon"), None);
    }

    #[test]
    fn test_voice_sex_preference() {
        let table = VoiceTable::default();
        let male = table.voice("en-US", Some("male")).unwrap();
        assert_eq!(male.name, "en-US-GuyNeural");

        // No matching sex falls back to the first voice.
        let fallback = table.voice("tr-TR", Some("robot")).unwrap();
        assert_eq!(fallback.name, "tr-TR-EmelNeural");

        // No preference takes the first voice.
        let first = table.voice("ru-RU", None).unwrap();
        assert_eq!(first.name, "ru-RU-SvetlanaNeural");
    }

    #[test]
    fn test_unknown_language_has_no_voice() {
        let table = VoiceTable::default();
        assert!(table.voice("fr-FR", None).is_none());
        assert!(table.voices_for("fr-FR").is_empty());
    }

    #[test]
    fn test_available_languages() {
        let table = VoiceTable::default();
        let langs = table.available_languages();
        assert_eq!(langs.get("en-US").map(String::as_str), Some("English"));
        assert_eq!(langs.len(), 3);
    }
}

//! Transcript arbitration: the consolidation point for both STT sessions.
//!
//! Every final utterance passes through here before anything downstream
//! sees it. The arbiter owns the per-source duplicate ledgers and the
//! queued-for-translation recency list; it drops cross-source echoes and
//! reclassifies loopback captures of our own TTS playout.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{Source, Utterance, TTS_SPEAKER_LABEL};

/// How long ledger entries are kept.
const LEDGER_WINDOW: Duration = Duration::from_secs(10);

/// How close two cross-source texts must be to count as one utterance.
const ECHO_WINDOW: Duration = Duration::from_secs(3);

/// Canonical text normalization used for every duplicate comparison:
/// lowercase, trim, then remove spaces, periods and commas.
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | ','))
        .collect()
}

/// Feature flags the arbiter needs per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArbiterContext {
    /// Cross-source echo suppression only applies while the mixer bridges
    /// mic audio into the loopback path.
    pub mixer_running: bool,
    /// TTS-to-mic enabled: SYSTEM captures may be our own playout.
    pub tts_to_mic: bool,
}

/// Consolidates finals from both STT sessions into canonical utterances.
#[derive(Debug, Default)]
pub struct TranscriptArbiter {
    mic_ledger: VecDeque<(String, Instant)>,
    system_ledger: VecDeque<(String, Instant)>,
    queued_for_translation: VecDeque<(String, Instant)>,
}

impl TranscriptArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one final utterance in arrival order.
    ///
    /// Returns `None` when the utterance is a cross-source echo; otherwise
    /// the canonical utterance, possibly reclassified to `Source::Tts`.
    pub fn process(&mut self, utterance: Utterance, ctx: ArbiterContext) -> Option<Utterance> {
        self.process_at(utterance, ctx, Instant::now())
    }

    fn process_at(
        &mut self,
        mut utterance: Utterance,
        ctx: ArbiterContext,
        now: Instant,
    ) -> Option<Utterance> {
        let normalized = normalize(&utterance.text);

        self.prune(now);

        // 1. Cross-source echo suppression (earlier arrival wins).
        if ctx.mixer_running {
            let other = match utterance.source {
                Source::Mic => &self.system_ledger,
                Source::System => &self.mic_ledger,
                Source::Tts => return Some(utterance),
            };
            let echoed = other
                .iter()
                .any(|(text, at)| *text == normalized && now.duration_since(*at) <= ECHO_WINDOW);
            if echoed {
                debug!(
                    source = %utterance.source,
                    text = %utterance.text,
                    "Dropped cross-source echo"
                );
                return None;
            }
        }

        // 2. Ledger update for the arriving source.
        match utterance.source {
            Source::Mic => self.mic_ledger.push_back((normalized.clone(), now)),
            Source::System => self.system_ledger.push_back((normalized.clone(), now)),
            Source::Tts => {}
        }

        // 3. TTS-echo reclassification: a SYSTEM capture that matches no
        // recently queued translation input is our own playout heard back.
        if utterance.source == Source::System && ctx.tts_to_mic {
            let matches_queued = self
                .queued_for_translation
                .iter()
                .any(|(text, _)| *text == normalized);
            if !matches_queued {
                info!(text = %utterance.text, "Reclassified loopback capture as TTS playout");
                utterance.source = Source::Tts;
                utterance.speaker_id = Some(TTS_SPEAKER_LABEL.to_string());
            }
        }

        Some(utterance)
    }

    /// Record that `text` was handed to the translation queue, so a later
    /// loopback capture of the same words is not mistaken for TTS playout.
    pub fn note_queued_for_translation(&mut self, text: &str) {
        self.queued_for_translation
            .push_back((normalize(text), Instant::now()));
    }

    /// All normalized texts currently remembered (both ledgers plus the
    /// queued-for-translation list). Used to freeze the seen-before-TTS
    /// set at feature-enable time.
    pub fn recent_texts(&self) -> Vec<String> {
        self.mic_ledger
            .iter()
            .chain(self.system_ledger.iter())
            .chain(self.queued_for_translation.iter())
            .map(|(text, _)| text.clone())
            .collect()
    }

    /// Clear the queued-for-translation recency list (feature toggles).
    pub fn clear_queued_for_translation(&mut self) {
        self.queued_for_translation.clear();
    }

    fn prune(&mut self, now: Instant) {
        for ledger in [
            &mut self.mic_ledger,
            &mut self.system_ledger,
            &mut self.queued_for_translation,
        ] {
            while let Some((_, at)) = ledger.front() {
                if now.duration_since(*at) > LEDGER_WINDOW {
                    ledger.pop_front();
                } else {
                    break;
                }
            }
        }
    }
}

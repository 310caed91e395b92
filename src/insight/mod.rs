//! Rate-limited meeting insight extraction.
//!
//! Batches transcript context and fires a single consolidated LLM call
//! that returns four insight categories as JSON. Candidates are
//! deduplicated against session memory (and within the batch) by an
//! LCS-similarity threshold before they are emitted and persisted.

pub mod similarity;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::llm::{prompts, ChatApi, ChatMessage, LlmError};
use crate::transcript::Source;

/// Context budget for analysis calls.
const ANALYSIS_CONTEXT_CHARS: usize = 4000;

/// Context budget for summary/chat windows.
pub const SUMMARY_CONTEXT_CHARS: usize = 3000;

/// How many history entries are retained for context assembly.
const MAX_HISTORY_ITEMS: usize = 20;

/// How many recent items per category are echoed back to the model as
/// "already captured".
const EXISTING_SHOWN: usize = 5;

/// Insight extraction tuning.
#[derive(Debug, Clone)]
pub struct InsightConfig {
    /// Minimum trimmed length of the latest utterance.
    pub min_text_length: usize,
    /// Minimum spacing between analyses.
    pub min_analysis_interval: Duration,
    /// Minimum new utterances since the last analysis.
    pub min_conversation_exchanges: u32,
    /// Similarity at or above which a candidate is a duplicate.
    pub similarity_threshold: f64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            min_analysis_interval: Duration::from_secs(45),
            min_conversation_exchanges: 3,
            similarity_threshold: 0.75,
        }
    }
}

/// One analysis result, already deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsightBatch {
    pub questions: Vec<String>,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub decisions: Vec<String>,
}

impl InsightBatch {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
            && self.key_points.is_empty()
            && self.action_items.is_empty()
            && self.decisions.is_empty()
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    text: String,
    source: Source,
    timestamp: String,
}

/// The analyzer. Owned by a single worker; other components enqueue
/// transcriptions through the engine.
pub struct InsightEngine {
    config: InsightConfig,
    history: Vec<HistoryEntry>,
    questions: Vec<String>,
    key_points: Vec<String>,
    action_items: Vec<String>,
    decisions: Vec<String>,
    last_analysis: Option<Instant>,
    exchanges_since_analysis: u32,
    last_text_len: usize,
}

impl InsightEngine {
    pub fn new(config: InsightConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            questions: Vec::new(),
            key_points: Vec::new(),
            action_items: Vec::new(),
            decisions: Vec::new(),
            last_analysis: None,
            exchanges_since_analysis: 0,
            last_text_len: 0,
        }
    }

    /// Record one transcription into the rolling context window and bump
    /// the analysis-trigger counters.
    pub fn add_transcription(&mut self, text: &str, source: Source, timestamp: &str) {
        self.add_context(text, source, timestamp);
        self.exchanges_since_analysis += 1;
        self.last_text_len = text.trim().chars().count();
    }

    /// Append to the conversation memory without affecting the analysis
    /// triggers (used for TTS playout captures, which are context for the
    /// chat but never analyzed).
    pub fn add_context(&mut self, text: &str, source: Source, timestamp: &str) {
        self.history.push(HistoryEntry {
            text: text.to_string(),
            source,
            timestamp: timestamp.to_string(),
        });
        if self.history.len() > MAX_HISTORY_ITEMS {
            let excess = self.history.len() - MAX_HISTORY_ITEMS;
            self.history.drain(..excess);
        }
    }

    /// Whether all trigger conditions hold: enough new exchanges, the
    /// rate-limit interval has elapsed, and the latest utterance is long
    /// enough to be worth analyzing.
    pub fn should_analyze(&self) -> bool {
        if self.exchanges_since_analysis < self.config.min_conversation_exchanges {
            return false;
        }
        if let Some(last) = self.last_analysis {
            if last.elapsed() < self.config.min_analysis_interval {
                return false;
            }
        }
        self.last_text_len >= self.config.min_text_length
    }

    /// Run one consolidated analysis call.
    ///
    /// Counters reset on every attempt — including parse failures — so the
    /// rate limit is preserved no matter the outcome. LLM transport errors
    /// are returned for the caller's warning counters; parse failures are
    /// logged here and yield an empty batch.
    pub async fn analyze(&mut self, llm: &Arc<dyn ChatApi>) -> Result<InsightBatch, LlmError> {
        self.exchanges_since_analysis = 0;
        self.last_analysis = Some(Instant::now());

        if self.history.is_empty() {
            return Ok(InsightBatch::default());
        }

        let context = self.recent_context(ANALYSIS_CONTEXT_CHARS);
        let existing = self.format_existing_insights();
        let prompt = prompts::insight_prompt(&existing, &context);

        let response = llm
            .complete(vec![ChatMessage::user(prompt)], 800, 0.7)
            .await?;

        let parsed = match parse_insight_response(&response) {
            Some(batch) => batch,
            None => {
                warn!(
                    preview = %response.chars().take(200).collect::<String>(),
                    "Failed to parse insight response as JSON"
                );
                return Ok(InsightBatch::default());
            }
        };

        let batch = InsightBatch {
            questions: self.filter_new(&parsed.questions, &self.questions),
            key_points: self.filter_new(&parsed.key_points, &self.key_points),
            action_items: self.filter_new(&parsed.action_items, &self.action_items),
            decisions: self.filter_new(&parsed.decisions, &self.decisions),
        };

        self.questions.extend(batch.questions.iter().cloned());
        self.key_points.extend(batch.key_points.iter().cloned());
        self.action_items.extend(batch.action_items.iter().cloned());
        self.decisions.extend(batch.decisions.iter().cloned());

        if !batch.is_empty() {
            info!(
                questions = batch.questions.len(),
                key_points = batch.key_points.len(),
                action_items = batch.action_items.len(),
                decisions = batch.decisions.len(),
                "New meeting insights"
            );
        }

        Ok(batch)
    }

    /// Most-recent-last conversation tail, bounded to `max_chars`.
    pub fn recent_context(&self, max_chars: usize) -> String {
        let mut parts = Vec::new();
        let mut count = 0;
        for entry in self.history.iter().rev() {
            let line = format!("[{}] {}", entry.source, entry.text);
            if count + line.len() > max_chars {
                break;
            }
            count += line.len();
            parts.push(line);
        }
        parts.reverse();
        parts.join("\n")
    }

    /// Transcript tail for the chat service, `[ts] [source] text` lines.
    pub fn transcript_context(&self, max_chars: usize) -> String {
        if self.history.is_empty() {
            return "No conversation yet. The meeting is just starting or no speech has been detected.".to_string();
        }
        let mut parts = Vec::new();
        let mut count = 0;
        for entry in self.history.iter().rev() {
            let line = format!("[{}] [{}] {}", entry.timestamp, entry.source, entry.text);
            if count + line.len() > max_chars {
                break;
            }
            count += line.len();
            parts.push(line);
        }
        if parts.is_empty() {
            return "No recent conversation available.".to_string();
        }
        parts.reverse();
        parts.join("\n")
    }

    /// Reset all per-session state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.questions.clear();
        self.key_points.clear();
        self.action_items.clear();
        self.decisions.clear();
        self.last_analysis = None;
        self.exchanges_since_analysis = 0;
        self.last_text_len = 0;
    }

    fn format_existing_insights(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        let mut section = |title: &str, items: &[String]| {
            if items.is_empty() {
                return;
            }
            let mut block = String::from(title);
            for item in items.iter().rev().take(EXISTING_SHOWN).rev() {
                block.push_str(&format!("\n- {item}"));
            }
            parts.push(block);
        };

        section("ALREADY CAPTURED KEY POINTS:", &self.key_points);
        section("ALREADY CAPTURED DECISIONS:", &self.decisions);
        section("ALREADY CAPTURED ACTION ITEMS:", &self.action_items);
        section("ALREADY ASKED QUESTIONS:", &self.questions);

        if parts.is_empty() {
            "No insights captured yet.".to_string()
        } else {
            parts.join("\n\n")
        }
    }

    /// Keep candidates that are not near-duplicates of existing items or
    /// of an earlier candidate in the same batch.
    fn filter_new(&self, candidates: &[String], existing: &[String]) -> Vec<String> {
        let threshold = self.config.similarity_threshold;
        let mut kept: Vec<String> = Vec::new();
        for candidate in candidates {
            let dup_existing = existing
                .iter()
                .any(|e| similarity::ratio(candidate, e) >= threshold);
            let dup_batch = kept
                .iter()
                .any(|k| similarity::ratio(candidate, k) >= threshold);
            if !dup_existing && !dup_batch {
                kept.push(candidate.clone());
            } else {
                debug!(candidate = %candidate, "Dropped duplicate insight");
            }
        }
        kept
    }
}

/// Parse the model's JSON reply tolerantly: markdown code fences are
/// stripped, item counts are capped, empty strings dropped. Returns `None`
/// only when the body is not valid JSON.
pub(crate) fn parse_insight_response(response: &str) -> Option<InsightBatch> {
    let mut clean = response.trim();
    if let Some(stripped) = clean.strip_prefix("```json") {
        clean = stripped;
    }
    if let Some(stripped) = clean.strip_prefix("```") {
        clean = stripped;
    }
    if let Some(stripped) = clean.strip_suffix("```") {
        clean = stripped;
    }
    let clean = clean.trim();

    let json: serde_json::Value = serde_json::from_str(clean).ok()?;

    let take = |key: &str, cap: usize| -> Vec<String> {
        json[key]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .take(cap)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    };

    Some(InsightBatch {
        questions: take("questions", 3),
        key_points: take("key_points", 3),
        action_items: take("action_items", 3),
        decisions: take("decisions", 2),
    })
}

/// Append a dated block per non-empty category to the session directory.
pub fn persist_batch(session_dir: &Path, batch: &InsightBatch) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let append = |file: &str, lines: &[String]| {
        if lines.is_empty() {
            return;
        }
        let path = session_dir.join(file);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| {
                writeln!(f, "\n=== {timestamp} ===")?;
                for line in lines {
                    writeln!(f, "{line}")?;
                }
                writeln!(f)
            });
        if let Err(e) = result {
            warn!("Could not save insights to {}: {}", path.display(), e);
        }
    };

    let numbered: Vec<String> = batch
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q))
        .collect();
    let bulleted = |items: &[String]| -> Vec<String> {
        items.iter().map(|t| format!("• {t}")).collect()
    };

    append("follow-up-questions.txt", &numbered);
    append("key-points.txt", &bulleted(&batch.key_points));
    append("action-items.txt", &bulleted(&batch.action_items));
    append("decisions.txt", &bulleted(&batch.decisions));
}

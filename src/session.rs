//! Meeting session identity, insight registry, and summary emission.
//!
//! One session per start-to-stop run. The manager owns the session
//! directory under the configured base, accumulates insights, and writes
//! the final JSON record plus a Markdown rendering when the session ends.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Insight categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Question,
    KeyPoint,
    ActionItem,
    Decision,
}

/// One captured insight.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingInsight {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub content: String,
    pub source: String,
    pub confidence: f64,
}

/// Session identity block of the summary record.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub title: String,
    pub participants: Vec<String>,
    pub transcript_count: u64,
}

#[derive(Debug, Clone, Serialize)]
struct SummaryStatistics {
    total_transcripts: u64,
    total_insights: usize,
    questions_generated: usize,
    key_points_identified: usize,
    action_items_captured: usize,
    decisions_recorded: usize,
}

#[derive(Debug, Clone, Serialize)]
struct SummaryItem {
    content: String,
    timestamp: String,
    source: String,
}

#[derive(Debug, Clone, Serialize)]
struct SummaryInsights {
    questions: Vec<SummaryItem>,
    key_points: Vec<SummaryItem>,
    action_items: Vec<SummaryItem>,
    decisions: Vec<SummaryItem>,
}

/// The authoritative session record written to
/// `meeting_summary_<id>.json`.
#[derive(Debug, Clone, Serialize)]
struct SessionSummary {
    session_info: SessionInfo,
    duration_minutes: i64,
    statistics: SummaryStatistics,
    insights: SummaryInsights,
    summary_generated: String,
}

/// Point-in-time session statistics for embedder display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatistics {
    pub session_id: String,
    pub duration_minutes: i64,
    pub transcripts: u64,
    pub total_insights: usize,
    pub questions: usize,
    pub key_points: usize,
    pub action_items: usize,
    pub decisions: usize,
}

/// Manages the active meeting session and its artifacts.
pub struct SessionManager {
    base_dir: PathBuf,
    session_dir: Option<PathBuf>,
    current: Option<SessionInfo>,
    start_time: Option<DateTime<Local>>,
    insights: Vec<MeetingInsight>,
}

impl SessionManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            session_dir: None,
            current: None,
            start_time: None,
            insights: Vec::new(),
        }
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Directory of the active session.
    pub fn session_dir(&self) -> Option<&Path> {
        self.session_dir.as_deref()
    }

    /// Start a new session; returns its id. At most one session is active,
    /// so an existing one is ended (and persisted) first.
    pub fn start_new_session(&mut self, title: Option<&str>) -> std::io::Result<String> {
        if self.current.is_some() {
            warn!("Session already active, ending it first");
            self.end_current_session();
        }

        let now = Local::now();
        let session_id = now.format("%Y%m%d_%H%M%S").to_string();
        let dir = self.base_dir.join(format!("session_{session_id}"));
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Created session folder");

        self.current = Some(SessionInfo {
            session_id: session_id.clone(),
            start_time: now.format(TIME_FORMAT).to_string(),
            end_time: None,
            title: title
                .map(String::from)
                .unwrap_or_else(|| format!("Meeting Session {session_id}")),
            participants: Vec::new(),
            transcript_count: 0,
        });
        self.start_time = Some(now);
        self.session_dir = Some(dir);
        self.insights.clear();

        info!(session_id = %session_id, "Started new meeting session");
        Ok(session_id)
    }

    /// Register one insight with the active session.
    pub fn add_insight(&mut self, kind: InsightKind, content: &str, source: &str, confidence: f64) {
        if self.current.is_none() {
            warn!("No active session; insight dropped");
            return;
        }
        self.insights.push(MeetingInsight {
            timestamp: Local::now().format(TIME_FORMAT).to_string(),
            kind,
            content: content.to_string(),
            source: source.to_string(),
            confidence,
        });
    }

    /// Bump the transcript counter.
    pub fn add_transcript_count(&mut self, count: u64) {
        if let Some(session) = &mut self.current {
            session.transcript_count += count;
        }
    }

    /// End the session: stamp the end time, write the JSON summary and its
    /// Markdown rendering, and clear in-memory state. Returns the written
    /// file paths.
    pub fn end_current_session(&mut self) -> Option<(PathBuf, PathBuf)> {
        let session = self.current.as_mut()?;
        session.end_time = Some(Local::now().format(TIME_FORMAT).to_string());

        let summary = self.build_summary()?;
        let dir = self.session_dir.clone()?;

        let json_path = dir.join(format!(
            "meeting_summary_{}.json",
            summary.session_info.session_id
        ));
        let md_path = dir.join(format!(
            "meeting_summary_{}.md",
            summary.session_info.session_id
        ));

        match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&json_path, json) {
                    warn!("Error saving summary: {}", e);
                }
            }
            Err(e) => warn!("Error serializing summary: {}", e),
        }
        if let Err(e) = std::fs::write(&md_path, render_markdown(&summary)) {
            warn!("Error saving Markdown summary: {}", e);
        }

        info!(session_id = %summary.session_info.session_id, "Ended meeting session");

        self.current = None;
        self.start_time = None;
        self.insights.clear();

        Some((json_path, md_path))
    }

    /// Current session statistics.
    pub fn statistics(&self) -> Option<SessionStatistics> {
        let session = self.current.as_ref()?;
        Some(SessionStatistics {
            session_id: session.session_id.clone(),
            duration_minutes: self.duration_minutes(),
            transcripts: session.transcript_count,
            total_insights: self.insights.len(),
            questions: self.count_kind(InsightKind::Question),
            key_points: self.count_kind(InsightKind::KeyPoint),
            action_items: self.count_kind(InsightKind::ActionItem),
            decisions: self.count_kind(InsightKind::Decision),
        })
    }

    fn count_kind(&self, kind: InsightKind) -> usize {
        self.insights.iter().filter(|i| i.kind == kind).count()
    }

    fn duration_minutes(&self) -> i64 {
        let Some(start) = self.start_time else { return 0 };
        (Local::now() - start).num_minutes()
    }

    fn items_of(&self, kind: InsightKind) -> Vec<SummaryItem> {
        self.insights
            .iter()
            .filter(|i| i.kind == kind)
            .map(|i| SummaryItem {
                content: i.content.clone(),
                timestamp: i.timestamp.clone(),
                source: i.source.clone(),
            })
            .collect()
    }

    fn build_summary(&self) -> Option<SessionSummary> {
        let session = self.current.as_ref()?;
        Some(SessionSummary {
            session_info: session.clone(),
            duration_minutes: self.duration_minutes(),
            statistics: SummaryStatistics {
                total_transcripts: session.transcript_count,
                total_insights: self.insights.len(),
                questions_generated: self.count_kind(InsightKind::Question),
                key_points_identified: self.count_kind(InsightKind::KeyPoint),
                action_items_captured: self.count_kind(InsightKind::ActionItem),
                decisions_recorded: self.count_kind(InsightKind::Decision),
            },
            insights: SummaryInsights {
                questions: self.items_of(InsightKind::Question),
                key_points: self.items_of(InsightKind::KeyPoint),
                action_items: self.items_of(InsightKind::ActionItem),
                decisions: self.items_of(InsightKind::Decision),
            },
            summary_generated: Local::now().format(TIME_FORMAT).to_string(),
        })
    }
}

fn render_markdown(summary: &SessionSummary) -> String {
    let mut md = String::new();
    let info = &summary.session_info;

    md.push_str(&format!("# {}\n\n", info.title));
    md.push_str(&format!("**Session ID:** {}\n", info.session_id));
    md.push_str(&format!("**Start Time:** {}\n", info.start_time));
    if let Some(end) = &info.end_time {
        md.push_str(&format!("**End Time:** {end}\n"));
    }
    md.push_str(&format!("**Duration:** {} minutes\n\n", summary.duration_minutes));

    md.push_str("## Statistics\n\n");
    let stats = &summary.statistics;
    md.push_str(&format!("- Total Transcripts: {}\n", stats.total_transcripts));
    md.push_str(&format!("- Total Insights: {}\n", stats.total_insights));
    md.push_str(&format!("- Questions Generated: {}\n", stats.questions_generated));
    md.push_str(&format!("- Key Points Identified: {}\n", stats.key_points_identified));
    md.push_str(&format!("- Action Items Captured: {}\n", stats.action_items_captured));
    md.push_str(&format!("- Decisions Recorded: {}\n\n", stats.decisions_recorded));

    let checkbox_section = |md: &mut String, title: &str, items: &[SummaryItem]| {
        if items.is_empty() {
            return;
        }
        md.push_str(&format!("## {title}\n\n"));
        for item in items {
            md.push_str(&format!("- [ ] {}\n", item.content));
        }
        md.push('\n');
    };

    checkbox_section(&mut md, "Key Points", &summary.insights.key_points);
    checkbox_section(&mut md, "Decisions", &summary.insights.decisions);
    checkbox_section(&mut md, "Action Items", &summary.insights.action_items);

    if !summary.insights.questions.is_empty() {
        md.push_str("## Suggested Follow-up Questions\n\n");
        for (i, item) in summary.insights.questions.iter().enumerate() {
            md.push_str(&format!("{}. {}\n", i + 1, item.content));
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle_and_artifacts() {
        let base = tempfile::tempdir().unwrap();
        let mut mgr = SessionManager::new(base.path());
        assert!(!mgr.is_active());

        let id = mgr.start_new_session(Some("Quarterly Planning")).unwrap();
        assert!(mgr.is_active());
        let session_dir = mgr.session_dir().unwrap().to_path_buf();
        assert!(session_dir.ends_with(format!("session_{id}")));
        assert!(session_dir.exists());

        mgr.add_transcript_count(4);
        mgr.add_insight(InsightKind::KeyPoint, "Budget fixed at 100k", "AI Assistant", 1.0);
        mgr.add_insight(InsightKind::Decision, "Ship in March", "AI Assistant", 1.0);
        mgr.add_insight(InsightKind::Question, "Who owns QA?", "AI Assistant", 1.0);

        let (json_path, md_path) = mgr.end_current_session().unwrap();
        assert!(!mgr.is_active());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["session_info"]["session_id"], id);
        assert_eq!(json["session_info"]["title"], "Quarterly Planning");
        assert!(json["session_info"]["end_time"].is_string());
        assert_eq!(json["statistics"]["total_transcripts"], 4);
        assert_eq!(json["statistics"]["total_insights"], 3);
        assert_eq!(json["statistics"]["questions_generated"], 1);
        assert_eq!(json["statistics"]["key_points_identified"], 1);
        assert_eq!(json["statistics"]["decisions_recorded"], 1);
        assert_eq!(json["insights"]["key_points"][0]["content"], "Budget fixed at 100k");
        assert!(json["insights"]["key_points"][0]["timestamp"].is_string());
        assert!(json["summary_generated"].is_string());

        let md = std::fs::read_to_string(&md_path).unwrap();
        assert!(md.starts_with("# Quarterly Planning"));
        assert!(md.contains("## Statistics"));
        assert!(md.contains("- [ ] Budget fixed at 100k"));
        assert!(md.contains("- [ ] Ship in March"));
        assert!(md.contains("## Suggested Follow-up Questions"));
        assert!(md.contains("1. Who owns QA?"));
    }

    #[test]
    fn test_insight_without_session_is_dropped() {
        let base = tempfile::tempdir().unwrap();
        let mut mgr = SessionManager::new(base.path());
        mgr.add_insight(InsightKind::Question, "Lost?", "AI Assistant", 1.0);
        assert!(mgr.statistics().is_none());
    }

    #[test]
    fn test_default_title_and_statistics() {
        let base = tempfile::tempdir().unwrap();
        let mut mgr = SessionManager::new(base.path());
        let id = mgr.start_new_session(None).unwrap();

        mgr.add_transcript_count(2);
        mgr.add_insight(InsightKind::ActionItem, "Send notes", "AI Assistant", 0.9);

        let stats = mgr.statistics().unwrap();
        assert_eq!(stats.session_id, id);
        assert_eq!(stats.transcripts, 2);
        assert_eq!(stats.action_items, 1);
        assert_eq!(stats.questions, 0);
    }

    #[test]
    fn test_second_start_ends_first_session() {
        let base = tempfile::tempdir().unwrap();
        let mut mgr = SessionManager::new(base.path());
        let first = mgr.start_new_session(None).unwrap();
        let first_dir = mgr.session_dir().unwrap().to_path_buf();

        let _second = mgr.start_new_session(None).unwrap();
        // The first session was persisted on the implicit end.
        assert!(first_dir
            .join(format!("meeting_summary_{first}.json"))
            .exists());
    }

    #[test]
    fn test_end_without_session() {
        let base = tempfile::tempdir().unwrap();
        let mut mgr = SessionManager::new(base.path());
        assert!(mgr.end_current_session().is_none());
    }
}

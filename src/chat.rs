//! Private context-grounded Q&A over the live transcript.
//!
//! Keeps a rolling conversation memory (pruned by age and turn count),
//! grounds every question in a sliding transcript window, and persists
//! each Q/A pair to the session's chat history file.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Local};
use tracing::{info, warn};

use crate::llm::prompts::{chat_question_text, CHAT_SYSTEM_CONTEXT};
use crate::llm::{ChatApi, ChatMessage, LlmError};

const CHAT_HISTORY_FILE: &str = "private-chat-history.txt";

/// One remembered conversation turn.
#[derive(Debug, Clone)]
struct MemoryMessage {
    role: String,
    content: String,
    timestamp: DateTime<Local>,
    #[allow(dead_code)]
    question_type: Option<String>,
}

/// Memory usage snapshot for embedder display.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    pub total_messages: usize,
    pub session_duration_minutes: i64,
    pub max_turns: usize,
    pub memory_age_hours: i64,
}

/// Rolling conversation memory.
#[derive(Debug)]
pub struct ChatMemory {
    max_turns: usize,
    max_age: ChronoDuration,
    messages: Vec<MemoryMessage>,
    session_start: DateTime<Local>,
}

impl Default for ChatMemory {
    fn default() -> Self {
        Self::new(10, 24)
    }
}

impl ChatMemory {
    pub fn new(max_turns: usize, max_age_hours: i64) -> Self {
        Self {
            max_turns,
            max_age: ChronoDuration::hours(max_age_hours),
            messages: Vec::new(),
            session_start: Local::now(),
        }
    }

    /// Remember one message and prune.
    pub fn add_message(&mut self, role: &str, content: &str, question_type: Option<&str>) {
        self.messages.push(MemoryMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Local::now(),
            question_type: question_type.map(String::from),
        });
        self.prune();
    }

    /// Provider-formatted message list, most recent turns only, excluding
    /// system messages when asked.
    pub fn context_messages(&self, include_system: bool) -> Vec<ChatMessage> {
        let recent = if self.messages.len() > self.max_turns {
            &self.messages[self.messages.len() - self.max_turns..]
        } else {
            &self.messages[..]
        };
        recent
            .iter()
            .filter(|m| include_system || m.role != "system")
            .map(|m| ChatMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Drop messages past the age limit, then trim to the turn limit.
    pub fn prune(&mut self) {
        let now = Local::now();
        self.messages
            .retain(|m| now - m.timestamp < self.max_age);
        if self.messages.len() > self.max_turns {
            let excess = self.messages.len() - self.max_turns;
            self.messages.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.session_start = Local::now();
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_messages: self.messages.len(),
            session_duration_minutes: (Local::now() - self.session_start).num_minutes(),
            max_turns: self.max_turns,
            memory_age_hours: self.max_age.num_hours(),
        }
    }
}

/// The private chat service.
pub struct ChatService {
    llm: Arc<dyn ChatApi>,
    memory: ChatMemory,
}

impl ChatService {
    pub fn new(llm: Arc<dyn ChatApi>) -> Self {
        Self {
            llm,
            memory: ChatMemory::default(),
        }
    }

    /// Ask one question grounded in the transcript tail.
    ///
    /// `question_type` selects a predefined question (`custom` forwards
    /// `question_text`). Memory is pruned before the call and updated with
    /// the new turn afterwards.
    pub async fn ask(
        &mut self,
        question_type: &str,
        question_text: &str,
        transcript_context: &str,
    ) -> Result<String, LlmError> {
        let question = chat_question_text(question_type, question_text);
        self.memory.prune();

        let system_context = format!(
            "{CHAT_SYSTEM_CONTEXT}\n\nCURRENT MEETING TRANSCRIPT:\n{transcript_context}\n\n\
             You have access to the above meeting transcript and conversation history. \
             Answer questions based on this context when relevant, or provide general \
             assistance when asked about topics outside the meeting."
        );

        let mut messages = vec![ChatMessage::system(system_context)];
        messages.extend(self.memory.context_messages(false));
        messages.push(ChatMessage::user(&question));

        let answer = self.llm.complete(messages, 400, 0.7).await?;

        self.memory
            .add_message("user", &question, Some(question_type));
        self.memory
            .add_message("assistant", &answer, Some(question_type));

        Ok(answer)
    }

    /// Append a Q/A block to the session's chat history file.
    pub fn save_to_history(
        &self,
        session_dir: &Path,
        question: &str,
        answer: &str,
        question_type: &str,
    ) {
        use std::io::Write;

        if let Err(e) = std::fs::create_dir_all(session_dir) {
            warn!("Could not create session folder: {}", e);
            return;
        }
        let path = session_dir.join(CHAT_HISTORY_FILE);
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let rule = "=".repeat(60);
        let entry = format!(
            "\n{rule}\n[{timestamp}] [{question_type}]\n{rule}\nQ: {question}\n\nA: {answer}\n"
        );

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(entry.as_bytes()));
        match result {
            Ok(()) => info!(question_type, "Chat history saved"),
            Err(e) => warn!("Could not save chat history: {}", e),
        }
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
        info!("Conversation memory cleared");
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    struct FakeLlm {
        seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl ChatApi for FakeLlm {
        fn complete(
            &self,
            messages: Vec<ChatMessage>,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
            self.seen.lock().unwrap().push(messages);
            Box::pin(async { Ok("the answer".to_string()) })
        }
    }

    #[test]
    fn test_memory_turn_limit() {
        let mut memory = ChatMemory::new(4, 24);
        for i in 0..10 {
            memory.add_message("user", &format!("m{i}"), None);
        }
        let ctx = memory.context_messages(true);
        assert_eq!(ctx.len(), 4);
        assert_eq!(ctx[0].content, "m6");
        assert_eq!(ctx[3].content, "m9");
    }

    #[test]
    fn test_memory_age_pruning() {
        let mut memory = ChatMemory::new(10, 24);
        memory.add_message("user", "ancient", None);
        // Backdate the first message past the age limit.
        memory.messages[0].timestamp = Local::now() - ChronoDuration::hours(25);
        memory.add_message("user", "recent", None);

        let ctx = memory.context_messages(true);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx[0].content, "recent");
    }

    #[test]
    fn test_memory_excludes_system_on_retrieval() {
        let mut memory = ChatMemory::default();
        memory.add_message("system", "sys ctx", None);
        memory.add_message("user", "hi", None);
        assert_eq!(memory.context_messages(false).len(), 1);
        assert_eq!(memory.context_messages(true).len(), 2);
    }

    #[test]
    fn test_memory_clear_and_stats() {
        let mut memory = ChatMemory::default();
        memory.add_message("user", "q", None);
        memory.add_message("assistant", "a", None);
        assert_eq!(memory.stats().total_messages, 2);
        memory.clear();
        assert_eq!(memory.stats().total_messages, 0);
        assert_eq!(memory.stats().max_turns, 10);
    }

    #[tokio::test]
    async fn test_ask_builds_grounded_prompt_and_remembers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut service = ChatService::new(Arc::new(FakeLlm { seen: seen.clone() }));

        let answer = service
            .ask("summarize", "", "[10:00:00] [MIC] We agreed on the budget.")
            .await
            .unwrap();
        assert_eq!(answer, "the answer");

        {
            let calls = seen.lock().unwrap();
            let messages = &calls[0];
            assert_eq!(messages[0].role, "system");
            assert!(messages[0].content.contains("CURRENT MEETING TRANSCRIPT"));
            assert!(messages[0].content.contains("We agreed on the budget."));
            assert!(messages.last().unwrap().content.contains("Summarize"));
        }

        // Second question carries the first turn as memory.
        service.ask("custom", "What was the budget?", "ctx").await.unwrap();
        let calls = seen.lock().unwrap();
        let messages = &calls[1];
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages.last().unwrap().content, "What was the budget?");
    }

    #[tokio::test]
    async fn test_history_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let service = ChatService::new(Arc::new(FakeLlm {
            seen: Arc::new(Mutex::new(Vec::new())),
        }));

        service.save_to_history(dir.path(), "What next?", "Ship it.", "next_steps");

        let contents =
            std::fs::read_to_string(dir.path().join("private-chat-history.txt")).unwrap();
        assert!(contents.contains(&"=".repeat(60)));
        assert!(contents.contains("[next_steps]"));
        assert!(contents.contains("Q: What next?"));
        assert!(contents.contains("\nA: Ship it."));
    }
}

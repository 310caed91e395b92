//! Prompt builders for translation, insight extraction, summaries, and the
//! private chat.

/// Build the translation prompt. The reply must be the bare translation.
pub fn translation_prompt(text: &str, target_language: &str) -> String {
    format!(
        "Translate the following text to {target_language}. \n\
         Provide ONLY the translation without any explanations, notes, or additional text.\n\
         \n\
         Text to translate:\n\
         {text}\n\
         \n\
         Translation:"
    )
}

/// Build the consolidated insight-extraction prompt.
///
/// `existing` lists what is already captured so the model only returns new
/// material; `context` is the recent conversation tail.
pub fn insight_prompt(existing: &str, context: &str) -> String {
    format!(
        "You are an AI meeting assistant analyzing a conversation to extract insights.\n\
         \n\
         IMPORTANT INSTRUCTIONS:\n\
         1. DO NOT repeat or rephrase insights that are already captured (see below)\n\
         2. Only identify NEW information not already documented\n\
         3. Be specific and actionable\n\
         4. If nothing new to add for a category, return an empty list for that category\n\
         5. Return your response as valid JSON only, no other text\n\
         \n\
         {existing}\n\
         \n\
         RECENT CONVERSATION:\n\
         {context}\n\
         \n\
         Analyze the RECENT CONVERSATION above and extract:\n\
         1. Follow-up questions (2-3 max): Specific questions to clarify or expand on NEW topics\n\
         2. Key points (1-3 max): Important NEW information or topics discussed\n\
         3. Action items (0-3 max): Clear NEW tasks, commitments, or to-dos mentioned\n\
         4. Decisions (0-2 max): Definitive NEW decisions, conclusions, or agreements made\n\
         \n\
         Return ONLY a JSON object in this exact format (with empty arrays if nothing new):\n\
         {{\n\
           \"questions\": [\"question 1\", \"question 2\"],\n\
           \"key_points\": [\"point 1\", \"point 2\"],\n\
           \"action_items\": [\"action 1\", \"action 2\"],\n\
           \"decisions\": [\"decision 1\"]\n\
         }}"
    )
}

/// Build the whole-meeting summary prompt.
pub fn summary_prompt(context: &str) -> String {
    format!(
        "Based on this entire meeting conversation, provide a comprehensive summary:\n\
         \n\
         CONVERSATION:\n\
         {context}\n\
         \n\
         Please provide:\n\
         1. A brief overall summary (2-3 sentences)\n\
         2. Main topics discussed\n\
         3. Key outcomes or conclusions\n\
         \n\
         Format your response clearly with headers."
    )
}

/// System context for the private chat assistant.
pub const CHAT_SYSTEM_CONTEXT: &str = "You are an expert AI assistant with deep understanding of business conversations and general knowledge.\n\
     You excel at:\n\
     - Extracting actionable insights, tracking decisions, and identifying key information from meeting transcripts\n\
     - Answering general questions on a wide range of topics\n\
     - Maintaining context from previous questions and referencing earlier parts of conversations\n\
     \n\
     When asked about meeting content, provide clear, structured, and actionable responses.\n\
     When asked general questions, provide helpful, accurate answers without unnecessary references to meeting context.\n\
     Always be concise and relevant to the specific question asked.";

/// Predefined private-chat question types and their question texts.
pub const COMMON_CHAT_QUESTIONS: &[(&str, &str)] = &[
    ("last_said", "What was just said in the last minute of the meeting?"),
    ("who_spoke", "Who spoke most recently and what did they talk about?"),
    ("summarize", "Summarize the meeting discussion so far."),
    ("action_items", "What action items have been mentioned so far?"),
    ("decisions", "What decisions have been made in this meeting?"),
    ("key_topics", "What are the key topics discussed in this meeting?"),
    ("next_steps", "Based on the discussion, what should the next steps be?"),
];

/// Resolve a question type to its question text. `custom` forwards the
/// caller-provided text; unknown types fall back to a generic question.
pub fn chat_question_text(question_type: &str, custom_question: &str) -> String {
    if question_type == "custom" {
        return custom_question.to_string();
    }
    COMMON_CHAT_QUESTIONS
        .iter()
        .find(|(key, _)| *key == question_type)
        .map(|(_, q)| q.to_string())
        .unwrap_or_else(|| "What is happening in the meeting?".to_string())
}

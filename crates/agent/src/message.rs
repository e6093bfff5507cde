//! Conversation state
//!
//! One invocation's transcript: an append-only sequence of Human, AI, and
//! Tool entries. Prior entries are read-only inputs to later stages; stages
//! that need a fixed shape (grading, evaluation) read through explicit
//! structured records instead of indexing the sequence.

use answerforge_common::KeywordSet;
use serde::{Deserialize, Serialize};

/// Author role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Ai,
    Tool,
}

/// One conversation entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: Role,
    pub content: String,

    /// Keyword metadata attached to a human entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<KeywordSet>,

    /// Name of the tool that produced a tool entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl MessageEntry {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            keywords: None,
            tool_name: None,
        }
    }
}

/// Append-only transcript of one invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    entries: Vec<MessageEntry>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_human(&mut self, content: impl Into<String>) {
        self.entries.push(MessageEntry::new(Role::Human, content.into()));
    }

    pub fn push_human_with_keywords(&mut self, content: impl Into<String>, keywords: KeywordSet) {
        let mut entry = MessageEntry::new(Role::Human, content.into());
        entry.keywords = Some(keywords);
        self.entries.push(entry);
    }

    pub fn push_ai(&mut self, content: impl Into<String>) {
        self.entries.push(MessageEntry::new(Role::Ai, content.into()));
    }

    pub fn push_tool(&mut self, content: impl Into<String>, tool_name: impl Into<String>) {
        let mut entry = MessageEntry::new(Role::Tool, content.into());
        entry.tool_name = Some(tool_name.into());
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at position `n` from the back (1 = last)
    pub fn from_back(&self, n: usize) -> Option<&MessageEntry> {
        if n == 0 || n > self.entries.len() {
            return None;
        }
        self.entries.get(self.entries.len() - n)
    }

    /// Content of the first AI-authored entry, if any
    pub fn first_ai(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.role == Role::Ai)
            .map(|entry| entry.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_back_indexing() {
        let mut state = ConversationState::new();
        state.push_human("question");
        state.push_ai("decision");
        state.push_tool("docs", "local_search");

        assert_eq!(state.from_back(1).unwrap().content, "docs");
        assert_eq!(state.from_back(3).unwrap().content, "question");
        assert!(state.from_back(4).is_none());
        assert!(state.from_back(0).is_none());
    }

    #[test]
    fn test_first_ai_skips_other_roles() {
        let mut state = ConversationState::new();
        state.push_human("q");
        state.push_tool("docs", "naive_search");
        assert!(state.first_ai().is_none());

        state.push_ai("the answer");
        state.push_ai("later");
        assert_eq!(state.first_ai(), Some("the answer"));
    }

    #[test]
    fn test_keyword_metadata_rides_on_human_entry() {
        let mut state = ConversationState::new();
        let keywords = KeywordSet {
            low_level: vec!["newton".to_string()],
            high_level: vec![],
        };
        state.push_human_with_keywords("q", keywords);
        assert!(state.from_back(1).unwrap().keywords.is_some());
    }
}

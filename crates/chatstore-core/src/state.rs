//! UI-agnostic chat state types
//!
//! This module contains the plain data held by the chat store. Nothing here
//! depends on a UI framework or on how the state is shared.

use serde::{Deserialize, Serialize};

/// A chat message in the AI conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

/// The five fields of the shared chat state.
///
/// Fields are independent: the store never derives one from another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatState {
    /// Accumulated chat entries, oldest first
    pub data: Vec<ChatMessage>,
    /// Current or latest answer text
    pub answer: String,
    /// Whether the streaming display region is active
    pub streamdiv: bool,
    /// Generic UI toggle
    pub toggled: bool,
    /// Whether a response is being awaited
    pub waiting: bool,
}

/// Names one field of [`ChatState`]; carried by change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Data,
    Answer,
    Streamdiv,
    Toggled,
    Waiting,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Data => "data",
            Field::Answer => "answer",
            Field::Streamdiv => "streamdiv",
            Field::Toggled => "toggled",
            Field::Waiting => "waiting",
        }
    }

    pub fn all() -> [Field; 5] {
        [
            Field::Data,
            Field::Answer,
            Field::Streamdiv,
            Field::Toggled,
            Field::Waiting,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_empty() {
        let state = ChatState::default();
        assert!(state.data.is_empty());
        assert_eq!(state.answer, "");
        assert!(!state.streamdiv);
        assert!(!state.toggled);
        assert!(!state.waiting);
    }

    #[test]
    fn test_field_names() {
        let names: Vec<&str> = Field::all().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["data", "answer", "streamdiv", "toggled", "waiting"]);
    }

    #[test]
    fn test_state_serializes_with_field_names() {
        let state = ChatState {
            data: vec![ChatMessage::user("hi")],
            waiting: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["data"][0]["role"], "user");
        assert_eq!(json["data"][0]["content"], "hi");
        assert_eq!(json["answer"], "");
        assert_eq!(json["waiting"], true);
    }
}

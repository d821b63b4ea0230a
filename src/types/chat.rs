//! Chat message and exchange types.

use serde::{Deserialize, Serialize};

use super::Usage;
use crate::profile::GenerationParams;

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One role-tagged turn in the wire-level message list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Creates a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// One exchange request: ordered turns plus generation parameter overrides.
///
/// Constructed fresh per call and never mutated after submission.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model id; falls back to the profile default when `None`.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Per-request overrides layered on top of the profile defaults.
    pub params: GenerationParams,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            params: GenerationParams::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw? {
            "stop" => Some(Self::Stop),
            "length" | "max_tokens" => Some(Self::Length),
            "content_filter" => Some(Self::ContentFilter),
            _ => Some(Self::Unknown),
        }
    }
}

/// A finished (or fully reassembled) completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn finish_reason_parses_known_values() {
        assert_eq!(FinishReason::parse(Some("stop")), Some(FinishReason::Stop));
        assert_eq!(
            FinishReason::parse(Some("length")),
            Some(FinishReason::Length)
        );
        assert_eq!(
            FinishReason::parse(Some("weird")),
            Some(FinishReason::Unknown)
        );
        assert_eq!(FinishReason::parse(None), None);
    }
}

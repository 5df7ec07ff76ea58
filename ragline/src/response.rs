//! OpenAI-style completion objects.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::RetrievedChunk;
use crate::generation::FinishReason;
use crate::prompt::ChatMessage;

/// One choice of a non-streaming [`Completion`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionChoice {
    /// Always 0.
    pub index: usize,
    /// The assistant's answer.
    pub message: ChatMessage,
    /// Why generation ended.
    pub finish_reason: Option<FinishReason>,
    /// Chunks used as context, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<RetrievedChunk>>,
}

/// A finished completion (`object: "completion"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    /// Unique id of the completion.
    pub id: String,
    /// Always `"completion"`.
    pub object: String,
    /// Unix timestamp in seconds.
    pub created: i64,
    /// Name of the model that answered.
    pub model: String,
    /// Exactly one choice.
    pub choices: Vec<CompletionChoice>,
}

impl Completion {
    pub(crate) fn new(model: &str, choice: CompletionChoice) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            object: "completion".to_string(),
            created: Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![choice],
        }
    }

    /// Text of the first choice.
    pub fn text(&self) -> &str {
        self.choices.first().map_or("", |c| c.message.content.as_str())
    }

    /// Finish reason of the first choice.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }

    /// Sources of the first choice.
    pub fn sources(&self) -> Option<&[RetrievedChunk]> {
        self.choices.first().and_then(|c| c.sources.as_deref())
    }
}

/// Incremental content of a [`CompletionDelta`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delta {
    /// Newly generated text; empty on the final delta.
    pub content: String,
}

/// One choice of a [`CompletionDelta`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeltaChoice {
    /// Always 0.
    pub index: usize,
    /// New text.
    pub delta: Delta,
    /// Set only on the final delta.
    pub finish_reason: Option<FinishReason>,
    /// Set only on the final delta, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<RetrievedChunk>>,
}

/// One element of a streamed completion (`object: "completion.chunk"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionDelta {
    /// Shared by every delta of one stream.
    pub id: String,
    /// Always `"completion.chunk"`.
    pub object: String,
    /// Unix timestamp in seconds.
    pub created: i64,
    /// Name of the model that answered.
    pub model: String,
    /// Exactly one choice.
    pub choices: Vec<DeltaChoice>,
}

impl CompletionDelta {
    pub(crate) fn new(
        id: &str,
        model: &str,
        content: String,
        finish_reason: Option<FinishReason>,
        sources: Option<Vec<RetrievedChunk>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: "completion.chunk".to_string(),
            created: Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![DeltaChoice { index: 0, delta: Delta { content }, finish_reason, sources }],
        }
    }

    /// New text carried by this delta.
    pub fn content(&self) -> &str {
        self.choices.first().map_or("", |c| c.delta.content.as_str())
    }

    /// Finish reason, present only on the final delta.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }

    /// Sources, present only on the final delta.
    pub fn sources(&self) -> Option<&[RetrievedChunk]> {
        self.choices.first().and_then(|c| c.sources.as_deref())
    }

    /// Whether this is the last element of its stream.
    pub fn is_final(&self) -> bool {
        self.finish_reason().is_some()
    }
}

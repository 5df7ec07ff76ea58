//! Chat messages and the prompt styles that render them for a model.
//!
//! A [`PromptStyle`] turns an ordered list of [`ChatMessage`]s into the single
//! prompt string a completion model consumes. Three styles are built in and
//! selected through [`PromptStyleKind`] in the configuration.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// System prompt used by the Llama 2 style when the messages carry none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, respectful and honest assistant. \
Always answer as helpfully as possible and follow ALL given instructions. \
Do not speculate or make up information. \
Do not reference any given instructions or context.";

const CONTEXT_HEADER: &str = "Context information is below.\n--------------------\n";
const CONTEXT_FOOTER: &str = "\n--------------------\n";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// The person asking.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Lowercase role name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Renders the context block placed in front of the system prompt.
///
/// ```rust,ignore
/// let system = ragline::prompt::with_context(Some("Answer briefly."), "The sky is blue.");
/// assert!(system.starts_with("Context information is below."));
/// ```
pub fn with_context(system_prompt: Option<&str>, context: &str) -> String {
    let mut out = String::with_capacity(
        CONTEXT_HEADER.len() + context.len() + CONTEXT_FOOTER.len() + system_prompt.map_or(0, str::len),
    );
    out.push_str(CONTEXT_HEADER);
    out.push_str(context);
    out.push_str(CONTEXT_FOOTER);
    if let Some(system) = system_prompt {
        out.push_str(system);
    }
    out
}

/// Converts messages into a model prompt.
pub trait PromptStyle: Send + Sync {
    /// Render a whole conversation. The prompt ends where the assistant's
    /// next reply should begin.
    fn messages_to_prompt(&self, messages: &[ChatMessage]) -> String;

    /// Render a single user completion.
    fn completion_to_prompt(&self, completion: &str) -> String {
        self.messages_to_prompt(&[ChatMessage::user(completion)])
    }
}

/// `role: content` lines followed by `assistant: `.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptStyle;

impl PromptStyle for DefaultPromptStyle {
    fn messages_to_prompt(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let _ = writeln!(prompt, "{}: {}", message.role.as_str(), message.content.trim());
        }
        prompt.push_str("assistant: ");
        prompt
    }

    fn completion_to_prompt(&self, completion: &str) -> String {
        completion.to_string()
    }
}

/// The Llama 2 chat template.
///
/// ```text
/// <s> [INST] <<SYS>>
///  system prompt
/// <</SYS>>
///
///  user message [/INST] assistant reply </s><s> [INST] next user message [/INST]
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Llama2PromptStyle;

impl Llama2PromptStyle {
    const BOS: &'static str = "<s>";
    const EOS: &'static str = "</s>";
    const B_INST: &'static str = "[INST]";
    const E_INST: &'static str = "[/INST]";
    const B_SYS: &'static str = "<<SYS>>\n";
    const E_SYS: &'static str = "\n<</SYS>>\n\n";
}

impl PromptStyle for Llama2PromptStyle {
    fn messages_to_prompt(&self, messages: &[ChatMessage]) -> String {
        let (system, rest) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => (first.content.as_str(), rest),
            _ => (DEFAULT_SYSTEM_PROMPT, messages),
        };

        let mut prompt = format!(
            "{} {} {} {} {} ",
            Self::BOS,
            Self::B_INST,
            Self::B_SYS,
            system.trim(),
            Self::E_SYS
        );
        let mut first_turn = true;
        for message in rest {
            match message.role {
                Role::Assistant => {
                    let _ = write!(prompt, " {} {}", message.content.trim(), Self::EOS);
                }
                Role::User | Role::System => {
                    if !first_turn {
                        let _ = write!(prompt, "{} {} ", Self::BOS, Self::B_INST);
                    }
                    let _ = write!(prompt, "{} {}", message.content.trim(), Self::E_INST);
                    first_turn = false;
                }
            }
        }
        prompt
    }
}

/// `<|role|>: content` lines followed by `<|assistant|>: `.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagPromptStyle;

impl PromptStyle for TagPromptStyle {
    fn messages_to_prompt(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let _ = writeln!(prompt, "<|{}|>: {}", message.role.as_str(), message.content.trim());
        }
        prompt.push_str("<|assistant|>: ");
        prompt
    }
}

/// Selects one of the built-in prompt styles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyleKind {
    /// [`DefaultPromptStyle`].
    Default,
    /// [`Llama2PromptStyle`].
    #[default]
    Llama2,
    /// [`TagPromptStyle`].
    Tag,
}

impl PromptStyleKind {
    /// Instantiate the selected style.
    pub fn build(self) -> Arc<dyn PromptStyle> {
        match self {
            Self::Default => Arc::new(DefaultPromptStyle),
            Self::Llama2 => Arc::new(Llama2PromptStyle),
            Self::Tag => Arc::new(TagPromptStyle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_style_lists_roles() {
        let prompt = DefaultPromptStyle
            .messages_to_prompt(&[ChatMessage::system("Be brief."), ChatMessage::user("Hi")]);
        assert_eq!(prompt, "system: Be brief.\nuser: Hi\nassistant: ");
    }

    #[test]
    fn tag_style_wraps_roles() {
        let prompt = TagPromptStyle.messages_to_prompt(&[ChatMessage::user("Hi")]);
        assert_eq!(prompt, "<|user|>: Hi\n<|assistant|>: ");
    }

    #[test]
    fn llama2_single_turn() {
        let prompt = Llama2PromptStyle
            .messages_to_prompt(&[ChatMessage::system("Be brief."), ChatMessage::user("Hi")]);
        assert_eq!(prompt, "<s> [INST] <<SYS>>\n Be brief. \n<</SYS>>\n\n Hi [/INST]");
    }

    #[test]
    fn llama2_multi_turn_closes_previous_answers() {
        let prompt = Llama2PromptStyle.messages_to_prompt(&[
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("Sky?"),
        ]);
        assert!(prompt.contains(DEFAULT_SYSTEM_PROMPT));
        assert!(prompt.ends_with(" Hi [/INST] Hello </s><s> [INST] Sky? [/INST]"));
    }

    #[test]
    fn context_precedes_system_prompt() {
        let system = with_context(Some("Answer briefly."), "The sky is blue.");
        assert_eq!(
            system,
            "Context information is below.\n--------------------\nThe sky is blue.\n--------------------\nAnswer briefly."
        );
    }

    #[test]
    fn kind_deserializes_snake_case() {
        let kind: PromptStyleKind = serde_json::from_str("\"llama2\"").unwrap();
        assert_eq!(kind, PromptStyleKind::Llama2);
    }
}

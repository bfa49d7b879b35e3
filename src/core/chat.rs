//! Token accounting for chat completion requests.
//!
//! A chat request costs more than the sum of its message texts: every
//! message is wrapped in delimiter tokens, names carry their own overhead,
//! and the reply is primed with `<|start|>assistant<|message|>`. The
//! constants below follow the published accounting rules for the
//! cl100k_base and o200k_base chat models.

use log::debug;
use thiserror::Error;

use super::pretrained::{context_size, encoding_for_model, singleton, Encoding};
use super::tokenizer::{CoreBPE, EncodeError, LoadError};

#[derive(Error, Debug)]
pub enum AccountError {
    /// Unknown model name, a model with no chat accounting rules, or a
    /// model whose context window is not known.
    #[error("Unknown model for token accounting: {0}")]
    UnknownModel(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// A function call requested by the assistant.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChatCompletionRequestMessage {
    /// `system`, `user`, `assistant` or `function`.
    pub role: String,
    pub content: Option<String>,
    pub name: Option<String>,
    pub function_call: Option<FunctionCall>,
}

impl ChatCompletionRequestMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_function_call(
        mut self,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        self.function_call = Some(FunctionCall {
            name: name.into(),
            arguments: arguments.into(),
        });
        self
    }
}

/// Structural overhead of one chat model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatFormat {
    /// Added once per message.
    pub tokens_per_message: i64,
    /// Added when a message carries a name. Negative for gpt-3.5, where the
    /// name replaces the role.
    pub tokens_per_name: i64,
    /// Added once per request for the reply priming.
    pub tokens_per_reply: i64,
}

impl ChatFormat {
    pub const GPT_3_5: ChatFormat = ChatFormat {
        tokens_per_message: 4,
        tokens_per_name: -1,
        tokens_per_reply: 3,
    };

    pub const DEFAULT: ChatFormat = ChatFormat {
        tokens_per_message: 3,
        tokens_per_name: 1,
        tokens_per_reply: 3,
    };

    /// Accounting rules and encoding for a chat model.
    pub fn for_model(model: &str) -> Result<(Encoding, ChatFormat), AccountError> {
        let encoding = encoding_for_model(model)
            .filter(|encoding| encoding.supports_chat())
            .ok_or_else(|| AccountError::UnknownModel(model.to_string()))?;
        // fine-tuned models keep the rules of their base model
        let base = model.strip_prefix("ft:").unwrap_or(model);
        let format = if base.starts_with("gpt-3.5") || base.starts_with("gpt-35") {
            Self::GPT_3_5
        } else {
            Self::DEFAULT
        };
        Ok((encoding, format))
    }
}

/// Count the prompt tokens of `messages` with an explicit tokenizer and
/// format.
pub fn count_message_tokens(
    bpe: &CoreBPE,
    format: ChatFormat,
    messages: &[ChatCompletionRequestMessage],
) -> Result<usize, EncodeError> {
    let mut num_tokens: i64 = 0;

    for message in messages {
        num_tokens += format.tokens_per_message;
        num_tokens += bpe.count_tokens(&message.role)? as i64;
        num_tokens += bpe.count_tokens(message.content.as_deref().unwrap_or(""))? as i64;
        if let Some(name) = &message.name {
            num_tokens += bpe.count_tokens(name)? as i64;
            num_tokens += format.tokens_per_name;
        }
        if let Some(call) = &message.function_call {
            num_tokens += bpe.count_tokens(&call.name)? as i64;
            num_tokens += bpe.count_tokens(&call.arguments)? as i64;
        }
    }
    num_tokens += format.tokens_per_reply;

    Ok(usize::try_from(num_tokens).unwrap_or(0))
}

/// Prompt tokens used by `messages` for a chat model.
pub fn num_tokens_from_messages(
    model: &str,
    messages: &[ChatCompletionRequestMessage],
) -> Result<usize, AccountError> {
    let (encoding, format) = ChatFormat::for_model(model)?;
    let bpe = singleton(encoding)?;
    let count = count_message_tokens(bpe, format, messages)?;
    debug!(
        "{} messages for {} use {} tokens",
        messages.len(),
        model,
        count
    );
    Ok(count)
}

fn context_window(model: &str) -> Result<usize, AccountError> {
    context_size(model).ok_or_else(|| AccountError::UnknownModel(model.to_string()))
}

/// Tokens left for the completion after `messages`, saturating at zero.
pub fn max_completion_tokens(
    model: &str,
    messages: &[ChatCompletionRequestMessage],
) -> Result<usize, AccountError> {
    let context = context_window(model)?;
    let prompt = num_tokens_from_messages(model, messages)?;
    Ok(context.saturating_sub(prompt))
}

/// Tokens left for the completion after a plain-text `prompt`, saturating
/// at zero. Works for every model with a known encoding and context
/// window, chat or not.
pub fn max_completion_tokens_for_prompt(model: &str, prompt: &str) -> Result<usize, AccountError> {
    let context = context_window(model)?;
    let encoding =
        encoding_for_model(model).ok_or_else(|| AccountError::UnknownModel(model.to_string()))?;
    let prompt_tokens = singleton(encoding)?.count_tokens(prompt)?;
    Ok(context.saturating_sub(prompt_tokens))
}

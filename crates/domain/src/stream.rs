//! The abstract model-stream capability the runtime consumes.
//!
//! Provider adapters live outside the core; anything that can open a
//! cancellable stream of [`ModelEvent`]s can drive the agent loop. The
//! in-tree [`crate::scripted::ScriptedClient`] is one such implementation.

use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolDefinition};

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token usage for one model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Stop => "stop",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
        }
    }
}

/// Events emitted while streaming one model response (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    /// Incremental assistant text, all chunks share one `message_id`.
    TextDelta { message_id: String, text: String },

    /// Incremental reasoning/thinking content.
    ThinkingDelta { text: String },

    /// The thinking segment finished.
    ThinkingEnd { duration_ms: u64 },

    /// The model requests a tool invocation (arguments fully assembled).
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The stream finished.
    Stop {
        finish_reason: StopReason,
        usage: Option<Usage>,
    },

    /// The provider reported an error; the stream ends after this.
    Error { message: String },
}

/// A request to open one streaming model call.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Model identifier override. `None` = the client's default.
    pub model: Option<String>,
}

/// Anything that can stream model responses for the agent loop.
///
/// The returned stream must terminate promptly when dropped; the runtime
/// drops it on cancellation.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    async fn open(&self, req: ModelRequest) -> Result<BoxStream<'static, ModelEvent>>;

    /// Short identifier for logs (e.g. `"scripted"`, `"anthropic"`).
    fn name(&self) -> &str;
}

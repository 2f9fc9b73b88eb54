//! Role-tagged prompt messages and transport-facing frame types.

use serde::{Deserialize, Serialize};

/// Role of a single prompt turn.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged turn of an assembled prompt.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A message received from the messaging transport.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub user_id: String,
    pub text: String,
}

/// Frame yielded on the outbound chunk stream for one inbound message.
///
/// Every answered message is framed as `Begin`, zero or more `Text` chunks,
/// then `End`. A deferred message yields no frames until its retry succeeds.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkFrame {
    Begin,
    Text(String),
    End,
}

/// Literal markers relayed to the transport for `Begin`/`End` frames.
pub const BEGIN_MARKER: &str = "[BEGIN]";
pub const END_MARKER: &str = "[END]";

impl ChunkFrame {
    /// Text representation sent over the messaging transport.
    pub fn render(&self) -> &str {
        match self {
            ChunkFrame::Begin => BEGIN_MARKER,
            ChunkFrame::Text(text) => text,
            ChunkFrame::End => END_MARKER,
        }
    }
}

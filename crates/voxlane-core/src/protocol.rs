//! voxlane wire protocol.
//!
//! Every message on the session WebSocket is a single JSON text frame with a
//! `type` discriminator. The server emits [`ServerFrame`]s; clients send
//! [`ClientCommand`]s.

use serde::{Deserialize, Serialize};

/// Server -> client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Turn processing began.
    Start,

    /// One display fragment of the assistant reply.
    Text { data: String },

    /// One frame of synthesized audio, base64 encoded.
    Audio { data: String, is_final: bool },

    /// The turn is fully drained.
    End,

    /// Non-fatal error.
    Error { msg: String },
}

impl ServerFrame {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { msg: msg.into() }
    }

    /// Short name of the frame type, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Text { .. } => "text",
            Self::Audio { .. } => "audio",
            Self::End => "end",
            Self::Error { .. } => "error",
        }
    }
}

/// Client -> server command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start a turn from typed text. Requires a valid token.
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default)]
        data: String,
    },

    /// Stop the in-flight turn and drain its queues.
    Interrupt {},

    /// One chunk of microphone audio (base64 PCM). Requires a valid token.
    Audio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default)]
        is_final: bool,
    },
}

impl ClientCommand {
    /// The auth token carried by privileged commands.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Chat { token, .. } | Self::Audio { token, .. } => token.as_deref(),
            Self::Interrupt {} => None,
        }
    }

    /// Whether the command mutates session state and therefore needs a token.
    pub fn is_privileged(&self) -> bool {
        !matches!(self, Self::Interrupt {})
    }
}

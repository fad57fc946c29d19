//! JSON line protocol for the text-in / text-out socket.
//!
//! One JSON object per line: a request carries a prompt, the reply carries
//! either the generated response or an error message.

use serde::{Deserialize, Serialize};

/// Request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

/// Reply sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptReply {
    Response { response: String },
    Error { error: String },
}

impl PromptRequest {
    /// Serialize request to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize request from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl PromptReply {
    pub fn response(text: impl Into<String>) -> Self {
        Self::Response {
            response: text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Serialize reply to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize reply from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

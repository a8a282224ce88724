use serde::{ Serialize, Deserialize };

use super::chat::CtaOutput;

/// One server-sent event on the chat stream. The SSE event name is [`StreamFrame::event_name`]
/// and the data line is the JSON form of the frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamFrame {
    Start {
        message_id: String,
    },
    TextDelta {
        delta: String,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: CtaOutput,
    },
    Finish,
    Error {
        error_text: String,
    },
}

impl StreamFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Start { .. } => "start",
            StreamFrame::TextDelta { .. } => "text-delta",
            StreamFrame::ToolResult { .. } => "tool-result",
            StreamFrame::Finish => "finish",
            StreamFrame::Error { .. } => "error",
        }
    }
}

/// Structured error code sent in the `X-Chat-Error` header of non-2xx chat responses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    CredentialInvalid,
    ClientThrottled,
    ServiceThrottled,
    BadRequest,
    Unavailable,
    VerificationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CredentialInvalid => "credential_invalid",
            ErrorCode::ClientThrottled => "client_throttled",
            ErrorCode::ServiceThrottled => "service_throttled",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::VerificationFailed => "verification_failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "credential_invalid" => Some(ErrorCode::CredentialInvalid),
            "client_throttled" => Some(ErrorCode::ClientThrottled),
            "service_throttled" => Some(ErrorCode::ServiceThrottled),
            "bad_request" => Some(ErrorCode::BadRequest),
            "unavailable" => Some(ErrorCode::Unavailable),
            "verification_failed" => Some(ErrorCode::VerificationFailed),
            _ => None,
        }
    }
}

pub const ERROR_CODE_HEADER: &str = "x-chat-error";
pub const CHAT_TOKEN_HEADER: &str = "x-chat-token";

use serde::{ Deserialize, Serialize };

/// Name of the single tool exposed to the model.
pub const DISPLAY_CTA_TOOL: &str = "display_cta";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallState {
    Pending,
    Result,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaOutput {
    pub should_show: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Part {
    Text {
        text: String,
    },
    ToolCall {
        tool_name: String,
        tool_call_id: String,
        state: ToolCallState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<CtaOutput>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// A `display_cta` call that has already been executed.
    pub fn resolved_cta(tool_call_id: impl Into<String>, output: CtaOutput) -> Self {
        Part::ToolCall {
            tool_name: DISPLAY_CTA_TOOL.to_string(),
            tool_call_id: tool_call_id.into(),
            state: ToolCallState::Result,
            output: Some(output),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, role: Role, parts: Vec<Part>) -> Self {
        Self { id: id.into(), role, parts }
    }

    /// Concatenation of every text part, in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::ToolCall { .. } => None,
            })
            .collect()
    }

    pub fn has_text(&self) -> bool {
        self.parts.iter().any(|part| matches!(part, Part::Text { text } if !text.is_empty()))
    }

    /// True when this message carries a resolved `display_cta` call asking for the button.
    pub fn wants_cta(&self) -> bool {
        self.parts.iter().any(|part| {
            matches!(
                part,
                Part::ToolCall { tool_name, state: ToolCallState::Result, output: Some(output), .. }
                    if tool_name == DISPLAY_CTA_TOOL && output.should_show
            )
        })
    }
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// A message as accepted by the gateway. Clients may send `parts` (any part types; only
/// text parts are read) or a plain `content` string.
#[derive(Clone, Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<serde_json::Value>,
    #[serde(default)]
    pub content: Option<String>,
}

impl IncomingMessage {
    pub fn text(&self) -> String {
        let from_parts: String = self.parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();
        if from_parts.is_empty() {
            self.content.clone().unwrap_or_default()
        } else {
            from_parts
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct IncomingChatRequest {
    pub messages: Vec<IncomingMessage>,
}

/// Body of `POST /api/chat-token`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub captcha_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_use_the_tagged_wire_shape() {
        let msg = ChatMessage::new(
            "a1",
            Role::Assistant,
            vec![Part::text("hi"), Part::resolved_cta("cta-1", CtaOutput { should_show: true })],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["parts"][0]["type"], "text");
        assert_eq!(json["parts"][1]["type"], "tool-call");
        assert_eq!(json["parts"][1]["toolName"], "display_cta");
        assert_eq!(json["parts"][1]["output"]["shouldShow"], true);
    }

    #[test]
    fn text_joins_text_parts_and_skips_tools() {
        let msg = ChatMessage::new(
            "a1",
            Role::Assistant,
            vec![
                Part::text("Hello "),
                Part::resolved_cta("c", CtaOutput { should_show: false }),
                Part::text("there"),
            ],
        );
        assert_eq!(msg.text(), "Hello there");
        assert!(!msg.wants_cta());
    }

    #[test]
    fn pending_call_does_not_request_cta() {
        let msg = ChatMessage::new(
            "a1",
            Role::Assistant,
            vec![Part::ToolCall {
                tool_name: DISPLAY_CTA_TOOL.into(),
                tool_call_id: "c".into(),
                state: ToolCallState::Pending,
                output: None,
            }],
        );
        assert!(!msg.wants_cta());
    }

    #[test]
    fn incoming_messages_accept_parts_or_content() {
        let body: IncomingChatRequest = serde_json::from_str(
            r#"{"messages":[
                {"role":"user","content":"plain"},
                {"id":"a1","role":"assistant","parts":[{"type":"step-start"},{"type":"text","text":"from "},{"type":"text","text":"parts"}]}
            ]}"#
        ).unwrap();
        assert_eq!(body.messages[0].text(), "plain");
        assert_eq!(body.messages[1].text(), "from parts");
        assert_eq!(body.messages[1].id.as_deref(), Some("a1"));
    }

    #[test]
    fn outgoing_request_is_readable_as_incoming() {
        let outgoing = ChatRequest {
            messages: vec![ChatMessage::new("u1", Role::User, vec![Part::text("hi")])],
        };
        let incoming: IncomingChatRequest = serde_json::from_value(serde_json::to_value(&outgoing).unwrap()).unwrap();
        assert_eq!(incoming.messages[0].role, Role::User);
        assert_eq!(incoming.messages[0].text(), "hi");
    }
}


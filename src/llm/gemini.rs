use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use log::{ debug, info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::Value;

use super::tools::ToolDefinition;
use super::{
    create_streaming_response,
    ChatClient,
    LlmConfig,
    LlmError,
    ModelRequest,
    ProviderEvent,
    ProviderStream,
};
use crate::models::chat::Role;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<GoogleFunctionCall>,
}

#[derive(Deserialize)]
struct GoogleFunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

/// Gemini schemas spell types in upper case (`OBJECT`, `BOOLEAN`).
fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) =>
            Value::Object(
                map
                    .iter()
                    .map(|(k, v)| {
                        let converted = match (k.as_str(), v) {
                            ("type", Value::String(t)) => Value::String(t.to_uppercase()),
                            _ => to_gemini_schema(v),
                        };
                        (k.clone(), converted)
                    })
                    .collect()
            ),
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

fn build_payload(request: &ModelRequest) -> GeminiStreamRequest {
    let contents = request.messages
        .iter()
        .map(|m| GeminiContent {
            role: Some(match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            }),
            parts: vec![GeminiPart { text: m.text.clone() }],
        })
        .collect();

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request.tools
                .iter()
                .map(|t: &ToolDefinition| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: to_gemini_schema(&t.parameters),
                })
                .collect(),
        }]
    };

    GeminiStreamRequest {
        system_instruction: GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: request.system.clone() }],
        },
        contents,
        tools,
    }
}

fn parse_gemini_chunk(data: &str) -> Result<Vec<ProviderEvent>, LlmError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let chunk: GoogleChunk = serde_json
        ::from_str(data)
        .map_err(|e| LlmError::Decode(e.to_string()))?;

    let mut events = Vec::new();
    for part in chunk.candidates
        .into_iter()
        .take(1)
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts) {
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            events.push(ProviderEvent::TextDelta(text));
        }
        if let Some(call) = part.function_call {
            events.push(ProviderEvent::ToolCall {
                id: call.id,
                name: call.name,
                args: call.args,
            });
        }
    }
    Ok(events)
}

pub struct GeminiChatClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::Config("Google API key is required for GeminiChatClient".to_string()))?;
        if let Some(base) = &config.base_url {
            url::Url::parse(base).map_err(|e| LlmError::Config(format!("Invalid CHAT_BASE_URL '{}': {}", base, e)))?;
        }

        Ok(Self::new(api_key, config.completion_model.clone(), config.base_url.clone()))
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn stream_chat(&self, request: ModelRequest) -> Result<ProviderStream, LlmError> {
        info!(
            "GeminiChatClient::stream_chat() → model={} messages={}",
            self.model,
            request.messages.len()
        );
        let payload = build_payload(&request);

        let resp = self.client
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Gemini returned {}: {}", status, body);
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let mut events = Box::pin(resp.bytes_stream().eventsource());

        Ok(
            create_streaming_response(move |tx| async move {
                loop {
                    let next = tokio::select! {
                        _ = tx.closed() => {
                            debug!("Gemini stream consumer went away; dropping provider response");
                            return;
                        }
                        next = events.next() => next,
                    };

                    let event = match next {
                        None => {
                            return;
                        }
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            let _ = tx.send(Err(LlmError::Stream(e.to_string()))).await;
                            return;
                        }
                    };

                    match parse_gemini_chunk(&event.data) {
                        Ok(parsed) => {
                            for provider_event in parsed {
                                if tx.send(Ok(provider_event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            })
        )
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

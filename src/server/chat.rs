use axum::body::Bytes;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{ Event, KeepAlive, KeepAliveStream, Sse };
use axum::Extension;
use futures::StreamExt;
use log::{ debug, error, info, warn };
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::error::GatewayError;
use super::{ client_identity, AppState, RequestLimits };
use crate::llm::tools::{ self, TurnCapabilities };
use crate::llm::{ ChatClient, ModelMessage, ModelRequest, ProviderEvent };
use crate::models::chat::{ IncomingChatRequest, Role, DISPLAY_CTA_TOOL };
use crate::models::stream::{ StreamFrame, CHAT_TOKEN_HEADER };
use crate::ratelimit::RateLimitDecision;

const PROVIDER_ERROR_TEXT: &str = "The assistant could not finish this response. Please try again.";

type FrameSender = mpsc::Sender<Result<Event, Infallible>>;
type FrameStream = ReceiverStream<Result<Event, Infallible>>;

/// `POST /api/chat`: credential, then request shape, then rate limits, then the model stream.
pub async fn chat_handler(
    State(state): State<AppState>,
    peer: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    body: Bytes
) -> Result<Sse<KeepAliveStream<FrameStream>>, GatewayError> {
    let token = headers
        .get(CHAT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if let Err(e) = state.issuer.verify(token) {
        debug!("Rejecting chat request: {}", e);
        return Err(GatewayError::CredentialInvalid);
    }

    let messages = parse_history(&body, state.limits)?;

    let identity = client_identity(&headers, peer.map(|Extension(ConnectInfo(addr))| addr));
    match state.limiter.check(&identity).await {
        Ok(RateLimitDecision::Allowed { burst_remaining, daily_remaining, global_remaining }) => {
            info!(
                "Chat request from {} allowed (burst left {}, daily left {}, global left {})",
                identity,
                burst_remaining,
                daily_remaining,
                global_remaining
            );
        }
        Ok(RateLimitDecision::ClientThrottled) => {
            warn!("Chat request from {} throttled", identity);
            return Err(GatewayError::ClientThrottled);
        }
        Ok(RateLimitDecision::ServiceThrottled) => {
            return Err(GatewayError::ServiceThrottled);
        }
        Err(e) => {
            error!("Rate limit check failed for {}: {}", identity, e);
            return Err(GatewayError::Unavailable);
        }
    }

    let request = ModelRequest {
        system: state.system_prompt.to_string(),
        messages,
        tools: tools::tool_definitions(),
    };
    let message_id = format!("msg-{}", Uuid::new_v4().simple());

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(relay_turn(state.chat_client.clone(), request, message_id, identity, tx));

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// Validates the submitted history and reduces it to what the model sees.
fn parse_history(body: &[u8], limits: RequestLimits) -> Result<Vec<ModelMessage>, GatewayError> {
    let req: IncomingChatRequest = serde_json
        ::from_slice(body)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid chat request: {}", e)))?;

    if req.messages.is_empty() {
        return Err(GatewayError::BadRequest("Conversation must contain at least one message.".into()));
    }
    if req.messages.len() > limits.max_messages {
        return Err(
            GatewayError::BadRequest(
                format!("Too many messages (at most {} allowed).", limits.max_messages)
            )
        );
    }

    let mut history = Vec::with_capacity(req.messages.len());
    for message in &req.messages {
        let text = message.text();
        if text.chars().count() > limits.max_message_chars {
            return Err(
                GatewayError::BadRequest(
                    format!("Message exceeds {} characters.", limits.max_message_chars)
                )
            );
        }
        history.push(ModelMessage { role: message.role, text });
    }

    match history.last() {
        Some(last) if last.role != Role::User => {
            return Err(GatewayError::BadRequest("The last message must come from the user.".into()));
        }
        Some(last) if last.text.trim().is_empty() => {
            return Err(GatewayError::BadRequest("The last message must not be empty.".into()));
        }
        _ => {}
    }

    history.retain(|m| !m.text.trim().is_empty());
    Ok(history)
}

async fn send_frame(tx: &FrameSender, frame: StreamFrame) -> bool {
    let event = match Event::default().event(frame.event_name()).json_data(&frame) {
        Ok(event) => event,
        Err(e) => {
            error!("Could not encode {} frame: {}", frame.event_name(), e);
            return false;
        }
    };
    tx.send(Ok(event)).await.is_ok()
}

/// Streams one model turn to the client. Returns early, dropping the provider stream, as soon as
/// the client goes away.
async fn relay_turn(
    client: Arc<dyn ChatClient>,
    request: ModelRequest,
    message_id: String,
    identity: String,
    tx: FrameSender
) {
    if !send_frame(&tx, StreamFrame::Start { message_id }).await {
        return;
    }

    let mut stream = match client.stream_chat(request).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Model request for {} failed: {}", identity, e);
            send_frame(&tx, StreamFrame::Error { error_text: PROVIDER_ERROR_TEXT.into() }).await;
            return;
        }
    };

    let mut turn = TurnCapabilities::default();
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                info!("Client {} disconnected; cancelling model stream", identity);
                return;
            }
            next = stream.next() => next,
        };

        match next {
            None => {
                break;
            }
            Some(Ok(ProviderEvent::TextDelta(delta))) => {
                if !send_frame(&tx, StreamFrame::TextDelta { delta }).await {
                    return;
                }
            }
            Some(Ok(ProviderEvent::ToolCall { id, name, args })) => {
                let output = match tools::execute(&name, &args) {
                    Ok(output) => output,
                    Err(e) => {
                        warn!("Ignoring tool call from model: {}", e);
                        continue;
                    }
                };
                turn.record(output);
                let frame = StreamFrame::ToolResult {
                    tool_call_id: id.unwrap_or_else(|| format!("call-{}", Uuid::new_v4().simple())),
                    tool_name: DISPLAY_CTA_TOOL.to_string(),
                    output,
                };
                if !send_frame(&tx, frame).await {
                    return;
                }
            }
            Some(Err(e)) => {
                error!("Model stream for {} failed: {}", identity, e);
                send_frame(&tx, StreamFrame::Error { error_text: PROVIDER_ERROR_TEXT.into() }).await;
                return;
            }
        }
    }

    info!("Chat turn for {} finished (cta shown: {})", identity, turn.show_cta);
    send_frame(&tx, StreamFrame::Finish).await;
}

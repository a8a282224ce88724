use chrono::Utc;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use log::{ debug, info, warn };
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::reconciler::{ ChatError, ChatErrorKind, Effect, ExchangeId, Reconciler, ReconcilerEvent };
use crate::models::chat::{ ChatMessage, ChatRequest, TokenRequest, TokenResponse };
use crate::models::stream::{ ErrorCode, StreamFrame, CHAT_TOKEN_HEADER, ERROR_CODE_HEADER };

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Rejected {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("unreadable frame: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn to_chat_error(&self) -> ChatError {
        match self {
            TransportError::Rejected { status, code, message } => {
                ChatError::new(ChatErrorKind::classify(*code, Some(*status), message), message.clone())
            }
            other => ChatError::new(ChatErrorKind::TransportOrProvider, other.to_string()),
        }
    }
}

/// HTTP client for the gateway's token and chat endpoints.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn request_token(&self, captcha_token: &str) -> Result<TokenResponse, TransportError> {
        let resp = self.http
            .post(format!("{}/api/chat-token", self.base_url))
            .json(&TokenRequest { captcha_token: captcha_token.to_string() })
            .send().await?;
        let resp = rejected_if_error(resp).await?;
        Ok(resp.json::<TokenResponse>().await?)
    }

    /// Runs one exchange on its own task. Every frame is forwarded to `events` in arrival order,
    /// ending with exactly one `StreamEnd` or `StreamError`.
    pub fn spawn_exchange(
        &self,
        exchange: ExchangeId,
        token: String,
        history: Vec<ChatMessage>,
        events: mpsc::Sender<ReconcilerEvent>
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.relay_exchange(exchange, &token, history, &events).await {
                debug!("Exchange {} failed: {}", exchange, e);
                let _ = events.send(ReconcilerEvent::StreamError {
                    exchange,
                    error: e.to_chat_error(),
                }).await;
            }
        })
    }

    async fn relay_exchange(
        &self,
        exchange: ExchangeId,
        token: &str,
        history: Vec<ChatMessage>,
        events: &mpsc::Sender<ReconcilerEvent>
    ) -> Result<(), TransportError> {
        let resp = self.http
            .post(format!("{}/api/chat", self.base_url))
            .header(CHAT_TOKEN_HEADER, token)
            .json(&ChatRequest { messages: history })
            .send().await?;
        let resp = rejected_if_error(resp).await?;

        let mut frames = Box::pin(resp.bytes_stream().eventsource());
        while let Some(event) = frames.next().await {
            let event = event.map_err(|e| TransportError::Stream(e.to_string()))?;
            let frame: StreamFrame = serde_json
                ::from_str(&event.data)
                .map_err(|e| TransportError::Decode(e.to_string()))?;

            let (next, terminal) = match frame {
                StreamFrame::Start { message_id } => {
                    (ReconcilerEvent::StreamStarted { exchange, message_id }, false)
                }
                StreamFrame::TextDelta { delta } => (ReconcilerEvent::Chunk { exchange, delta }, false),
                StreamFrame::ToolResult { tool_call_id, output, .. } => {
                    (ReconcilerEvent::ToolResult { exchange, tool_call_id, output }, false)
                }
                StreamFrame::Finish => (ReconcilerEvent::StreamEnd { exchange }, true),
                StreamFrame::Error { error_text } => {
                    let error = ChatError::new(ChatErrorKind::TransportOrProvider, error_text);
                    (ReconcilerEvent::StreamError { exchange, error }, true)
                }
            };
            if events.send(next).await.is_err() || terminal {
                return Ok(());
            }
        }

        Err(TransportError::Stream("connection closed before the reply finished".to_string()))
    }
}

async fn rejected_if_error(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = resp.headers()
        .get(ERROR_CODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(ErrorCode::parse);
    let message = resp.text().await.unwrap_or_default();
    warn!("Gateway answered {}: {}", status, message);
    Err(TransportError::Rejected { status: status.as_u16(), code, message })
}

/// Owns a [`Reconciler`] and carries out its stream effects. Stream events from every exchange
/// go through one queue, so the reconciler sees them in arrival order.
pub struct ChatSession {
    reconciler: Reconciler,
    client: GatewayClient,
    events_tx: mpsc::Sender<ReconcilerEvent>,
    events_rx: mpsc::Receiver<ReconcilerEvent>,
    streams: HashMap<ExchangeId, JoinHandle<()>>,
}

impl ChatSession {
    pub fn new(client: GatewayClient, reconciler: Reconciler) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            reconciler,
            client,
            events_tx,
            events_rx,
            streams: HashMap::new(),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Trades a challenge response for a credential. Any failure is terminal for the session.
    pub async fn verify(&mut self, captcha_token: &str) -> Vec<Effect> {
        match self.client.request_token(captcha_token).await {
            Ok(issued) => {
                info!("Chat credential issued, expires at {}", issued.expires_at);
                self.dispatch(ReconcilerEvent::CredentialIssued {
                    token: issued.token,
                    expires_at: issued.expires_at,
                })
            }
            Err(e) => {
                warn!("Chat verification failed: {}", e);
                self.dispatch(ReconcilerEvent::VerificationFailed)
            }
        }
    }

    pub fn send(&mut self, text: &str) -> Vec<Effect> {
        self.dispatch(ReconcilerEvent::Send {
            text: text.to_string(),
            now: Utc::now().timestamp(),
        })
    }

    pub fn abort(&mut self) -> Vec<Effect> {
        self.dispatch(ReconcilerEvent::Abort)
    }

    /// Feeds one event to the reconciler and performs the stream effects it asks for.
    pub fn dispatch(&mut self, event: ReconcilerEvent) -> Vec<Effect> {
        let effects = self.reconciler.handle(event);
        for effect in &effects {
            match effect {
                Effect::OpenStream { exchange, token, history } => {
                    let handle = self.client.spawn_exchange(
                        *exchange,
                        token.clone(),
                        history.clone(),
                        self.events_tx.clone()
                    );
                    self.streams.insert(*exchange, handle);
                }
                Effect::CancelStream { exchange } => {
                    if let Some(handle) = self.streams.remove(exchange) {
                        handle.abort();
                    }
                }
                Effect::ViewChanged | Effect::UserSent => {}
            }
        }
        effects
    }

    /// Waits for the next stream event and applies it.
    pub async fn pump(&mut self) -> Vec<Effect> {
        let Some(event) = self.events_rx.recv().await else {
            return Vec::new();
        };
        if let ReconcilerEvent::StreamEnd { exchange } | ReconcilerEvent::StreamError { exchange, .. } = &event {
            self.streams.remove(exchange);
        }
        self.dispatch(event)
    }

    /// Pumps events until no exchange is in flight.
    pub async fn run_until_settled(&mut self) {
        while self.reconciler.is_loading() {
            self.pump().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::reconciler::{ ChatAvailability, StreamStatus };
    use crate::llm::ProviderEvent;
    use crate::models::chat::Role;
    use crate::ratelimit::{ Quota, Quotas };
    use crate::server::build_router;
    use crate::server::tests::{ default_quotas, test_state, ScriptedChatClient };
    use serde_json::json;
    use std::time::Duration;

    async fn spawn_gateway(quotas: Quotas) -> String {
        let client = ScriptedChatClient::replying(
            vec![
                Ok(ProviderEvent::TextDelta("Happy to ".into())),
                Ok(ProviderEvent::TextDelta("help.".into())),
                Ok(ProviderEvent::ToolCall {
                    id: Some("call-9".into()),
                    name: "display_cta".into(),
                    args: json!({ "shouldShow": true }),
                })
            ]
        );
        let app = build_router(test_state(client, quotas));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn settled(session: &mut ChatSession) {
        tokio::time::timeout(Duration::from_secs(5), session.run_until_settled()).await.expect("exchange settled");
    }

    #[tokio::test]
    async fn full_exchange_builds_the_conversation() {
        let base = spawn_gateway(default_quotas()).await;
        let mut session = ChatSession::new(GatewayClient::new(base), Reconciler::with_id_prefix("t"));

        session.verify("challenge").await;
        assert_eq!(session.reconciler().chat_availability(Utc::now().timestamp()), ChatAvailability::Ready);

        let effects = session.send("Can you build my shop?");
        assert!(effects.contains(&Effect::UserSent));
        settled(&mut session).await;

        let r = session.reconciler();
        assert_eq!(r.status(), StreamStatus::Done);
        let view = r.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].role, Role::Assistant);
        assert!(view[1].id.starts_with("msg-"));
        assert_eq!(view[1].text(), "Happy to help.");
        assert!(r.cta_visible(&view[1]));
    }

    #[tokio::test]
    async fn throttled_send_synthesizes_a_reply() {
        let quotas = Quotas { burst: Quota::new(1, Duration::from_secs(60)), ..default_quotas() };
        let base = spawn_gateway(quotas).await;
        let mut session = ChatSession::new(GatewayClient::new(base), Reconciler::with_id_prefix("t"));
        session.verify("challenge").await;

        session.send("first");
        settled(&mut session).await;
        session.send("second");
        settled(&mut session).await;

        let r = session.reconciler();
        assert_eq!(r.status(), StreamStatus::Error);
        assert_eq!(r.last_error().map(|e| e.kind), Some(ChatErrorKind::ClientThrottled));
        let view = r.view();
        assert_eq!(view.len(), 4);
        assert_eq!(view[3].id, format!("rate-limit-{}", view[2].id));
        assert_eq!(r.messages().len(), 3);
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_verification() {
        let mut session = ChatSession::new(GatewayClient::new("http://127.0.0.1:1"), Reconciler::with_id_prefix("t"));
        session.verify("challenge").await;
        assert_eq!(
            session.reconciler().chat_availability(Utc::now().timestamp()),
            ChatAvailability::VerificationFailed
        );
        assert!(session.send("hello").is_empty());
    }

    #[test]
    fn rejections_keep_their_structured_code() {
        let err = TransportError::Rejected {
            status: 429,
            code: Some(ErrorCode::ServiceThrottled),
            message: "Service momentarily unavailable due to high traffic.".into(),
        };
        assert_eq!(err.to_chat_error().kind, ChatErrorKind::ServiceThrottled);

        let decode = TransportError::Decode("bad".into());
        assert_eq!(decode.to_chat_error().kind, ChatErrorKind::TransportOrProvider);
    }
}

//! Client-side conversation state.
//!
//! [`Reconciler`] is a deterministic state machine: every input is a [`ReconcilerEvent`], every
//! output is a list of [`Effect`]s for the driver to carry out. Stream events are tagged with
//! the exchange they belong to, and anything from an exchange that is no longer in flight is
//! dropped, which keeps the view consistent after an abort.
//!
//! Throttled turns get one locally synthesized assistant reply (an apology plus a booking
//! button). The synthetic message lives only in [`Reconciler::view`]; it is never sent back to
//! the gateway, and a genuine reply to the same user message replaces it.

use log::debug;
use std::collections::HashSet;

use crate::models::chat::{ ChatMessage, CtaOutput, Part, Role };
use crate::models::stream::ErrorCode;

pub const DEFAULT_RATE_LIMIT_MESSAGE: &str =
    "You've reached the message limit for now! I'd love to continue our conversation - why not book a discovery call? We can answer all your questions and discuss how we can help bring your ideas to life.";

pub type ExchangeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Idle,
    Submitted,
    Streaming,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAvailability {
    Verifying,
    Ready,
    VerificationFailed,
    CredentialExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorKind {
    VerificationFailed,
    CredentialInvalidOrExpired,
    ClientThrottled,
    ServiceThrottled,
    TransportOrProvider,
}

impl ChatErrorKind {
    /// The structured code wins when present; otherwise the message text is matched by keyword.
    pub fn classify(code: Option<ErrorCode>, status: Option<u16>, message: &str) -> Self {
        if let Some(code) = code {
            return match code {
                ErrorCode::CredentialInvalid => ChatErrorKind::CredentialInvalidOrExpired,
                ErrorCode::ClientThrottled => ChatErrorKind::ClientThrottled,
                ErrorCode::ServiceThrottled => ChatErrorKind::ServiceThrottled,
                ErrorCode::VerificationFailed => ChatErrorKind::VerificationFailed,
                ErrorCode::BadRequest | ErrorCode::Unavailable => ChatErrorKind::TransportOrProvider,
            };
        }

        let lowered = message.to_lowercase();
        if lowered.contains("rate limit") {
            ChatErrorKind::ClientThrottled
        } else if lowered.contains("high traffic") {
            ChatErrorKind::ServiceThrottled
        } else if status == Some(401) && lowered.contains("token") {
            ChatErrorKind::CredentialInvalidOrExpired
        } else {
            ChatErrorKind::TransportOrProvider
        }
    }

    pub fn is_throttle(&self) -> bool {
        matches!(self, ChatErrorKind::ClientThrottled | ChatErrorKind::ServiceThrottled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    pub kind: ChatErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ChatErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerEvent {
    CredentialIssued {
        token: String,
        expires_at: i64,
    },
    VerificationFailed,
    Send {
        text: String,
        now: i64,
    },
    /// The gateway accepted the exchange and proposed an id for the assistant reply.
    StreamStarted {
        exchange: ExchangeId,
        message_id: String,
    },
    Chunk {
        exchange: ExchangeId,
        delta: String,
    },
    ToolResult {
        exchange: ExchangeId,
        tool_call_id: String,
        output: CtaOutput,
    },
    StreamEnd {
        exchange: ExchangeId,
    },
    StreamError {
        exchange: ExchangeId,
        error: ChatError,
    },
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenStream {
        exchange: ExchangeId,
        token: String,
        history: Vec<ChatMessage>,
    },
    CancelStream {
        exchange: ExchangeId,
    },
    ViewChanged,
    /// The user just sent a message; the viewport should re-stick to the bottom.
    UserSent,
}

#[derive(Debug, Clone)]
struct Credential {
    token: String,
    expires_at: i64,
}

#[derive(Debug)]
struct Exchange {
    id: ExchangeId,
    proposed_id: Option<String>,
    assistant_index: Option<usize>,
}

#[derive(Debug)]
pub struct Reconciler {
    messages: Vec<ChatMessage>,
    status: StreamStatus,
    credential: Option<Credential>,
    credential_rejected: bool,
    verification_failed: bool,
    throttled: HashSet<String>,
    in_flight: Option<Exchange>,
    next_exchange: ExchangeId,
    next_local_id: u64,
    id_prefix: String,
    last_error: Option<ChatError>,
    rate_limit_message: String,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::with_id_prefix(format!("local-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Local message ids become `{prefix}-{n}`.
    pub fn with_id_prefix(prefix: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            status: StreamStatus::Idle,
            credential: None,
            credential_rejected: false,
            verification_failed: false,
            throttled: HashSet::new(),
            in_flight: None,
            next_exchange: 1,
            next_local_id: 1,
            id_prefix: prefix.into(),
            last_error: None,
            rate_limit_message: DEFAULT_RATE_LIMIT_MESSAGE.to_string(),
        }
    }

    pub fn with_rate_limit_message(mut self, message: impl Into<String>) -> Self {
        self.rate_limit_message = message.into();
        self
    }

    pub fn handle(&mut self, event: ReconcilerEvent) -> Vec<Effect> {
        match event {
            ReconcilerEvent::CredentialIssued { token, expires_at } => {
                if self.verification_failed {
                    return Vec::new();
                }
                self.credential = Some(Credential { token, expires_at });
                self.credential_rejected = false;
                vec![Effect::ViewChanged]
            }
            ReconcilerEvent::VerificationFailed => {
                self.verification_failed = true;
                self.credential = None;
                vec![Effect::ViewChanged]
            }
            ReconcilerEvent::Send { text, now } => self.send(text, now),
            ReconcilerEvent::StreamStarted { exchange, message_id } => {
                if let Some(current) = self.current_exchange(exchange) {
                    if current.assistant_index.is_none() {
                        current.proposed_id = Some(message_id);
                    }
                }
                Vec::new()
            }
            ReconcilerEvent::Chunk { exchange, delta } => {
                if self.current_exchange(exchange).is_none() || delta.is_empty() {
                    return Vec::new();
                }
                let index = self.assistant_message_index();
                let parts = &mut self.messages[index].parts;
                match parts.last_mut() {
                    Some(Part::Text { text }) => text.push_str(&delta),
                    _ => parts.push(Part::text(delta)),
                }
                if self.status == StreamStatus::Submitted {
                    self.status = StreamStatus::Streaming;
                }
                vec![Effect::ViewChanged]
            }
            ReconcilerEvent::ToolResult { exchange, tool_call_id, output } => {
                if self.current_exchange(exchange).is_none() {
                    return Vec::new();
                }
                let index = self.assistant_message_index();
                let parts = &mut self.messages[index].parts;
                let resolved = Part::resolved_cta(tool_call_id.clone(), output);
                let existing = parts
                    .iter_mut()
                    .find(|part| matches!(part, Part::ToolCall { tool_call_id: id, .. } if *id == tool_call_id));
                match existing {
                    Some(part) => {
                        *part = resolved;
                    }
                    None => parts.push(resolved),
                }
                if self.status == StreamStatus::Submitted {
                    self.status = StreamStatus::Streaming;
                }
                vec![Effect::ViewChanged]
            }
            ReconcilerEvent::StreamEnd { exchange } => {
                if self.current_exchange(exchange).is_none() {
                    return Vec::new();
                }
                self.in_flight = None;
                self.status = StreamStatus::Done;
                vec![Effect::ViewChanged]
            }
            ReconcilerEvent::StreamError { exchange, error } => {
                if self.current_exchange(exchange).is_none() {
                    return Vec::new();
                }
                self.in_flight = None;
                self.status = StreamStatus::Error;
                self.on_error(error);
                vec![Effect::ViewChanged]
            }
            ReconcilerEvent::Abort => {
                let Some(exchange) = self.in_flight.take() else {
                    return Vec::new();
                };
                self.status = StreamStatus::Idle;
                vec![Effect::CancelStream { exchange: exchange.id }, Effect::ViewChanged]
            }
        }
    }

    fn send(&mut self, text: String, now: i64) -> Vec<Effect> {
        if text.trim().is_empty() || self.is_loading() || self.verification_failed {
            return Vec::new();
        }
        let token = match &self.credential {
            Some(credential) if credential.expires_at > now => credential.token.clone(),
            _ => {
                debug!("Send ignored: no usable chat credential");
                return Vec::new();
            }
        };

        let id = self.local_id();
        self.messages.push(ChatMessage::new(id, Role::User, vec![Part::text(text)]));

        let exchange = self.next_exchange;
        self.next_exchange += 1;
        self.in_flight = Some(Exchange { id: exchange, proposed_id: None, assistant_index: None });
        self.status = StreamStatus::Submitted;
        self.last_error = None;

        vec![
            Effect::UserSent,
            Effect::ViewChanged,
            Effect::OpenStream { exchange, token, history: self.messages.clone() }
        ]
    }

    fn on_error(&mut self, error: ChatError) {
        match error.kind {
            ChatErrorKind::CredentialInvalidOrExpired => {
                self.credential = None;
                self.credential_rejected = true;
            }
            ChatErrorKind::VerificationFailed => {
                self.verification_failed = true;
                self.credential = None;
            }
            kind if kind.is_throttle() => {
                if let Some(user_id) = self.unanswered_last_user_message() {
                    self.throttled.insert(user_id);
                }
            }
            _ => {}
        }
        self.last_error = Some(error);
    }

    fn current_exchange(&mut self, exchange: ExchangeId) -> Option<&mut Exchange> {
        match self.in_flight.as_mut() {
            Some(current) if current.id == exchange => Some(current),
            _ => {
                debug!("Dropping event for stale exchange {}", exchange);
                None
            }
        }
    }

    /// Index of the in-flight exchange's assistant message, creating it on first use.
    fn assistant_message_index(&mut self) -> usize {
        if let Some(index) = self.in_flight.as_ref().and_then(|ex| ex.assistant_index) {
            return index;
        }
        let proposed = self.in_flight.as_mut().and_then(|ex| ex.proposed_id.take());
        let id = match proposed {
            Some(id) if !self.id_taken(&id) => id,
            _ => self.local_id(),
        };
        self.messages.push(ChatMessage::new(id, Role::Assistant, Vec::new()));
        let index = self.messages.len() - 1;
        if let Some(exchange) = self.in_flight.as_mut() {
            exchange.assistant_index = Some(index);
        }
        index
    }

    fn id_taken(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id) || id.starts_with("rate-limit-")
    }

    fn local_id(&mut self) -> String {
        loop {
            let id = format!("{}-{}", self.id_prefix, self.next_local_id);
            self.next_local_id += 1;
            if !self.messages.iter().any(|m| m.id == id) {
                return id;
            }
        }
    }

    fn unanswered_last_user_message(&self) -> Option<String> {
        let index = self.messages.iter().rposition(|m| m.role == Role::User)?;
        match self.messages.get(index + 1) {
            Some(next) if next.role == Role::Assistant => None,
            _ => Some(self.messages[index].id.clone()),
        }
    }

    fn synthetic_reply(&self, user_id: &str) -> ChatMessage {
        ChatMessage::new(
            format!("rate-limit-{}", user_id),
            Role::Assistant,
            vec![
                Part::text(self.rate_limit_message.clone()),
                Part::resolved_cta(format!("cta-{}", user_id), CtaOutput { should_show: true })
            ]
        )
    }

    /// What the UI renders: the genuine conversation plus one synthetic reply after each
    /// throttled user message that has no genuine reply.
    pub fn view(&self) -> Vec<ChatMessage> {
        let mut view = Vec::with_capacity(self.messages.len() + self.throttled.len());
        for (index, message) in self.messages.iter().enumerate() {
            view.push(message.clone());
            if message.role != Role::User || !self.throttled.contains(&message.id) {
                continue;
            }
            let answered = matches!(self.messages.get(index + 1), Some(next) if next.role == Role::Assistant);
            if !answered {
                view.push(self.synthetic_reply(&message.id));
            }
        }
        view
    }

    /// The genuine conversation, as sent to the gateway.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn in_flight_exchange(&self) -> Option<ExchangeId> {
        self.in_flight.as_ref().map(|ex| ex.id)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, StreamStatus::Submitted | StreamStatus::Streaming)
    }

    /// Typing-indicator condition: submitted, and no assistant text has arrived yet.
    pub fn is_waiting_for_response(&self) -> bool {
        if self.status != StreamStatus::Submitted {
            return false;
        }
        !matches!(self.messages.last(), Some(last) if last.role == Role::Assistant && last.has_text())
    }

    /// Id of the message currently receiving chunks, if any.
    pub fn streaming_message_id(&self) -> Option<&str> {
        if self.status != StreamStatus::Streaming {
            return None;
        }
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.id.as_str())
    }

    pub fn show_suggestions(&self) -> bool {
        self.messages.is_empty()
    }

    /// A message's booking button shows once it asked for one and is no longer streaming.
    pub fn cta_visible(&self, message: &ChatMessage) -> bool {
        message.wants_cta() && self.streaming_message_id() != Some(message.id.as_str())
    }

    pub fn chat_availability(&self, now: i64) -> ChatAvailability {
        if self.verification_failed {
            return ChatAvailability::VerificationFailed;
        }
        match &self.credential {
            Some(credential) if credential.expires_at > now => ChatAvailability::Ready,
            Some(_) => ChatAvailability::CredentialExpired,
            None if self.credential_rejected => ChatAvailability::CredentialExpired,
            None => ChatAvailability::Verifying,
        }
    }
}

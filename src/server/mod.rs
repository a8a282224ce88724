pub mod api;
pub mod chat;
pub mod error;

use axum::extract::{ Request, State };
use axum::http::{ HeaderMap, HeaderName };
use axum::middleware::{ self, Next };
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::Router;
use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter as FloodLimiter };
use log::{ error, info, warn };
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

use crate::auth::{ BotVerifier, ChatTokenIssuer, TurnstileVerifier };
use crate::cli::Args;
use crate::config::prompt::load_system_prompt;
use crate::llm::{ self, ChatClient, LlmConfig, LlmType };
use crate::models::stream::ERROR_CODE_HEADER;
use crate::ratelimit::{ create_counter_store, Quotas, RateLimiter };
use self::error::GatewayError;

/// Size limits applied to every chat request before it reaches the rate limiter.
#[derive(Clone, Copy, Debug)]
pub struct RequestLimits {
    pub max_messages: usize,
    pub max_message_chars: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<ChatTokenIssuer>,
    pub verifier: Arc<dyn BotVerifier>,
    pub limiter: Arc<RateLimiter>,
    pub chat_client: Arc<dyn ChatClient>,
    pub system_prompt: Arc<str>,
    pub limits: RequestLimits,
    pub flood_guard: Option<Arc<DefaultDirectRateLimiter>>,
}

impl AppState {
    pub async fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let issuer = ChatTokenIssuer::new(args.chat_secret_key.as_bytes(), args.token_ttl())?;

        if args.turnstile_secret_key.is_empty() {
            warn!("TURNSTILE_SECRET_KEY is not set; every verification attempt will be rejected");
        }
        let verifier = TurnstileVerifier::new(
            args.turnstile_secret_key.clone(),
            args.turnstile_verify_url.clone()
        );

        let store = create_counter_store(args).await?;
        let limiter = RateLimiter::new(store, Quotas::from_args(args));

        let llm_config = LlmConfig {
            llm_type: args.chat_llm_type.parse::<LlmType>()?,
            api_key: Some(args.chat_api_key.clone()),
            completion_model: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
        };
        let chat_client = llm::new_client(&llm_config)?;

        let system_prompt = load_system_prompt(args.system_prompt_path.as_deref())?;

        Ok(Self {
            issuer: Arc::new(issuer),
            verifier: Arc::new(verifier),
            limiter: Arc::new(limiter),
            chat_client,
            system_prompt: Arc::from(system_prompt),
            limits: RequestLimits {
                max_messages: args.max_messages,
                max_message_chars: args.max_message_chars,
            },
            flood_guard: flood_guard(args.flood_guard_rps),
        })
    }
}

/// Process-wide request ceiling; `None` when disabled.
pub fn flood_guard(rps: u32) -> Option<Arc<DefaultDirectRateLimiter>> {
    NonZeroU32::new(rps).map(|rps| Arc::new(FloodLimiter::direct(Quota::per_second(rps))))
}

async fn flood_guard_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(guard) = &state.flood_guard {
        if guard.check().is_err() {
            warn!("Flood guard tripped; rejecting {} {}", req.method(), req.uri().path());
            return GatewayError::Busy.into_response();
        }
    }
    next.run(req).await
}

/// First `X-Forwarded-For` entry, else the socket peer, else loopback.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(ERROR_CODE_HEADER)]);

    Router::new()
        .route("/api/health", get(api::health_handler))
        .route("/api/chat-token", post(api::chat_token_handler))
        .route("/api/chat", post(chat::chat_handler))
        .layer(middleware::from_fn_with_state(state.clone(), flood_guard_middleware))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    args: &Args,
    state: AppState
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = args.server_addr.parse::<SocketAddr>()?;
    let app = build_router(state);

    match (args.enable_tls, &args.tls_cert_path, &args.tls_key_path) {
        (true, Some(cert_path), Some(key_path)) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;
            info!("Starting HTTPS chat gateway on: https://{}", addr);
            axum_server
                ::bind_rustls(addr, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        }
        (true, _, _) => {
            error!("ENABLE_TLS is set but TLS_CERT_PATH or TLS_KEY_PATH is missing");
            return Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "TLS requires both --tls-cert-path and --tls-key-path"
                    )
                )
            );
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("Starting HTTP chat gateway on: http://{}", addr);
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        }
    }

    Ok(())
}

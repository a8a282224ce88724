use clap::Parser;
use std::time::Duration;

/// Upper bound for `CHAT_TOKEN_TTL_SECS` (30 days).
pub const MAX_TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Process-wide request ceiling per second applied before any handler runs. 0 disables it.
    #[arg(long, env = "FLOOD_GUARD_RPS", default_value = "50")]
    pub flood_guard_rps: u32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    // --- Credential Args ---
    /// Symmetric key used to sign and verify chat tokens (HS256).
    #[arg(long, env = "CHAT_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub chat_secret_key: String,

    /// Lifetime of an issued chat token, in seconds.
    #[arg(long, env = "CHAT_TOKEN_TTL_SECS", default_value = "7200")]
    pub chat_token_ttl_secs: u64,

    // --- Bot Verification Args ---
    /// Shared secret for the human-verification service.
    #[arg(long, env = "TURNSTILE_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub turnstile_secret_key: String,

    /// Verification endpoint the challenge response is posted to.
    #[arg(
        long,
        env = "TURNSTILE_VERIFY_URL",
        default_value = "https://challenges.cloudflare.com/turnstile/v0/siteverify"
    )]
    pub turnstile_verify_url: String,

    // --- Rate Limit Args ---
    /// Counter store backing the rate limiter (redis, memory). `memory` only suits a single process.
    #[arg(long, env = "RATE_LIMIT_STORE", default_value = "redis")]
    pub rate_limit_store: String,

    /// Redis URL for the shared rate-limit counters.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Prefix for rate-limit counter keys.
    #[arg(long, env = "RATE_LIMIT_PREFIX", default_value = "ask-ai/ratelimit")]
    pub rate_limit_prefix: String,

    /// Requests allowed per client within the burst window.
    #[arg(long, env = "BURST_LIMIT", default_value = "5")]
    pub burst_limit: u64,

    /// Burst window length in seconds.
    #[arg(long, env = "BURST_WINDOW_SECS", default_value = "60")]
    pub burst_window_secs: u64,

    /// Requests allowed per client within the daily window.
    #[arg(long, env = "DAILY_LIMIT", default_value = "50")]
    pub daily_limit: u64,

    /// Daily window length in seconds.
    #[arg(long, env = "DAILY_WINDOW_SECS", default_value = "86400")]
    pub daily_window_secs: u64,

    /// Requests allowed across all clients within the global window.
    #[arg(long, env = "GLOBAL_LIMIT", default_value = "1000")]
    pub global_limit: u64,

    /// Global window length in seconds.
    #[arg(long, env = "GLOBAL_WINDOW_SECS", default_value = "86400")]
    pub global_window_secs: u64,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (gemini)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "gemini")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API.
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider.
    #[arg(long, env = "CHAT_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gemini-2.5-flash-lite)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    // --- Conversation Args ---
    /// Optional path to a file replacing the built-in system prompt.
    #[arg(long, env = "SYSTEM_PROMPT_PATH")]
    pub system_prompt_path: Option<String>,

    /// Maximum number of messages accepted in one chat request.
    #[arg(long, env = "MAX_MESSAGES", default_value = "50")]
    pub max_messages: usize,

    /// Maximum characters accepted in a single message.
    #[arg(long, env = "MAX_MESSAGE_CHARS", default_value = "4000")]
    pub max_message_chars: usize,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if self.chat_secret_key.trim().is_empty() {
            return Err("CHAT_SECRET_KEY must be set".to_string());
        }
        if self.chat_token_ttl_secs == 0 || self.chat_token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(
                format!("CHAT_TOKEN_TTL_SECS must be between 1 and {}", MAX_TOKEN_TTL_SECS)
            );
        }
        let limits = [
            ("burst", self.burst_limit, self.burst_window_secs),
            ("daily", self.daily_limit, self.daily_window_secs),
            ("global", self.global_limit, self.global_window_secs),
        ];
        for (scope, limit, window) in limits {
            if limit == 0 || window == 0 {
                return Err(format!("{} limit and window must be greater than zero", scope));
            }
        }
        if self.max_messages == 0 || self.max_message_chars == 0 {
            return Err("MAX_MESSAGES and MAX_MESSAGE_CHARS must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.chat_token_ttl_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_args() -> Args {
    Args::parse_from([
        "ask-ai-gateway",
        "--chat-secret-key",
        "test-signing-key",
        "--rate-limit-store",
        "memory",
    ])
}

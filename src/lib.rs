pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod llm;
pub mod models;
pub mod ratelimit;
pub mod server;

use cli::Args;
use log::info;
use server::AppState;
use std::error::Error;

fn is_set(value: &str) -> &'static str {
    if value.trim().is_empty() { "not set" } else { "set" }
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("Flood Guard: {} req/s", args.flood_guard_rps);
    info!("Chat Secret Key: {}", is_set(&args.chat_secret_key));
    info!("Chat Token TTL: {}s", args.chat_token_ttl_secs);
    info!("Turnstile Secret Key: {}", is_set(&args.turnstile_secret_key));
    info!("Rate Limit Store: {}", args.rate_limit_store);
    if args.rate_limit_store.eq_ignore_ascii_case("redis") {
        info!("Redis URL: {}", args.redis_url);
    }
    info!(
        "Quotas: burst {}/{}s, daily {}/{}s, global {}/{}s",
        args.burst_limit,
        args.burst_window_secs,
        args.daily_limit,
        args.daily_window_secs,
        args.global_limit,
        args.global_window_secs
    );
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("(provider default)"));
    info!("Chat API Key: {}", is_set(&args.chat_api_key));
    info!("System Prompt: {}", args.system_prompt_path.as_deref().unwrap_or("(built-in)"));
    info!("-------------------------");

    args.validate().map_err(|message| std::io::Error::new(std::io::ErrorKind::InvalidInput, message))?;

    let state = AppState::from_args(&args).await?;
    info!("Using model: {}", state.chat_client.get_model());
    server::start_http_server(&args, state).await?;

    Ok(())
}

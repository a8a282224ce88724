use async_trait::async_trait;
use log::{ info, warn };
use serde::{ Deserialize, Serialize };

/// Checks a human-verification challenge response against an external service.
///
/// Any failure (rejected response, transport error, unreadable body) is reported as `false`.
/// Callers must not retry.
#[async_trait]
pub trait BotVerifier: Send + Sync {
    async fn verify(&self, challenge_response: &str) -> bool;
}

#[derive(Serialize)]
struct SiteVerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct TurnstileVerifier {
    client: reqwest::Client,
    secret: String,
    verify_url: String,
}

impl TurnstileVerifier {
    pub fn new(secret: String, verify_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret,
            verify_url,
        }
    }
}

#[async_trait]
impl BotVerifier for TurnstileVerifier {
    async fn verify(&self, challenge_response: &str) -> bool {
        if challenge_response.trim().is_empty() {
            warn!("Rejecting empty challenge response without contacting the verifier");
            return false;
        }

        let body = SiteVerifyRequest {
            secret: &self.secret,
            response: challenge_response,
        };
        let resp = match self.client.post(&self.verify_url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Bot verification request failed: {}", e);
                return false;
            }
        };

        if let Err(e) = resp.error_for_status_ref() {
            warn!("Bot verification endpoint returned an error status: {}", e);
            return false;
        }

        match resp.json::<SiteVerifyResponse>().await {
            Ok(result) if result.success => {
                info!("Bot verification passed");
                true
            }
            Ok(result) => {
                warn!("Bot verification rejected: {:?}", result.error_codes);
                false
            }
            Err(e) => {
                warn!("Bot verification response could not be decoded: {}", e);
                false
            }
        }
    }
}

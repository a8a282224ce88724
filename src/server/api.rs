use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use log::{ error, info, warn };
use serde_json::json;

use super::error::GatewayError;
use super::AppState;
use crate::auth::TokenError;
use crate::models::chat::{ TokenRequest, TokenResponse };

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "model": state.chat_client.get_model(),
        "tokenTtlSecs": state.issuer.ttl().as_secs(),
    }))
}

/// Exchanges a human-verification challenge response for a chat token.
pub async fn chat_token_handler(
    State(state): State<AppState>,
    body: Bytes
) -> Result<Json<TokenResponse>, GatewayError> {
    let req: TokenRequest = serde_json
        ::from_slice(&body)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid token request: {}", e)))?;

    let verified = state.verifier.verify(&req.captcha_token).await;

    match state.issuer.issue(verified) {
        Ok(issued) => {
            info!("Issued chat token expiring at {}", issued.claims.exp);
            Ok(
                Json(TokenResponse {
                    token: issued.token,
                    expires_at: issued.claims.exp,
                })
            )
        }
        Err(TokenError::VerificationFailed) => {
            warn!("Refusing chat token: bot verification failed");
            Err(GatewayError::VerificationFailed)
        }
        Err(e) => {
            error!("Could not sign chat token: {}", e);
            Err(GatewayError::Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::build_router;
    use super::super::tests::{ default_quotas, test_state, FixedVerifier, ScriptedChatClient };
    use crate::models::stream::ERROR_CODE_HEADER;
    use axum::body::Body;
    use axum::http::{ Request, StatusCode };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn token_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat-token")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn verified_challenge_yields_a_usable_token() {
        let state = test_state(ScriptedChatClient::replying(vec![]), default_quotas());
        let issuer = state.issuer.clone();
        let app = build_router(state);

        let resp = app.oneshot(token_request(r#"{"captchaToken":"ok"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let token = json["token"].as_str().unwrap();
        let claims = issuer.verify(token).unwrap();
        assert!(claims.allowed);
        assert_eq!(json["expiresAt"].as_i64(), Some(claims.exp));
    }

    #[tokio::test]
    async fn failed_verification_issues_nothing() {
        let mut state = test_state(ScriptedChatClient::replying(vec![]), default_quotas());
        state.verifier = Arc::new(FixedVerifier(false));
        let app = build_router(state);

        let resp = app.oneshot(token_request(r#"{"captchaToken":"bot"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.headers()[ERROR_CODE_HEADER], "verification_failed");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Human verification failed.");
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let state = test_state(ScriptedChatClient::replying(vec![]), default_quotas());
        let app = build_router(state);

        let resp = app.oneshot(token_request(r#"{"captcha":1}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()[ERROR_CODE_HEADER], "bad_request");
    }

    #[tokio::test]
    async fn health_reports_model() {
        let state = test_state(ScriptedChatClient::replying(vec![]), default_quotas());
        let app = build_router(state);
        let resp = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap()).await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model"], "scripted");
        assert_eq!(json["tokenTtlSecs"], 7200);
    }
}

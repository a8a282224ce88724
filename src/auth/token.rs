//! Short-lived chat credentials.
//!
//! A chat token is a compact HS256 JWT carrying `{allowed, iat, exp}`. Nothing is stored
//! server-side: every chat request re-verifies signature and expiry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{ Hmac, Mac };
use serde::{ Deserialize, Serialize };
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("bot verification failed")]
    VerificationFailed,
    #[error("signing key must not be empty")]
    EmptySecret,
    #[error("malformed chat token")]
    Malformed,
    #[error("unsupported token algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("invalid chat token signature")]
    BadSignature,
    #[error("chat token expired")]
    Expired,
    #[error("chat token does not grant chat access")]
    NotAllowed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatClaims {
    pub allowed: bool,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Serialize, Deserialize, Debug)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: ChatClaims,
}

#[derive(Clone)]
pub struct ChatTokenIssuer {
    secret: Vec<u8>,
    ttl: Duration,
}

impl ChatTokenIssuer {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Result<Self, TokenError> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        Ok(Self { secret, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, verified: bool) -> Result<IssuedToken, TokenError> {
        self.issue_at(verified, Utc::now().timestamp())
    }

    /// Signs a token valid from `now` (unix seconds) for the configured TTL.
    /// Never signs anything when `verified` is false.
    pub fn issue_at(&self, verified: bool, now: i64) -> Result<IssuedToken, TokenError> {
        if !verified {
            return Err(TokenError::VerificationFailed);
        }
        let claims = ChatClaims {
            allowed: true,
            iat: now,
            exp: now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
        };
        let header = Header { alg: ALGORITHM.to_string(), typ: Some("JWT".to_string()) };

        let header_json = serde_json::to_vec(&header).map_err(|_| TokenError::Malformed)?;
        let claims_json = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{}.{}", signing_input, signature),
            claims,
        })
    }

    pub fn verify(&self, token: &str) -> Result<ChatClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<ChatClaims, TokenError> {
        let mut segments = token.trim().split('.');
        let (header_b64, claims_b64, signature_b64) = match
            (segments.next(), segments.next(), segments.next(), segments.next())
        {
            (Some(h), Some(c), Some(s), None) if !h.is_empty() && !c.is_empty() => (h, c, s),
            _ => {
                return Err(TokenError::Malformed);
            }
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

        let claims: ChatClaims = decode_segment(claims_b64)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        if !claims.allowed {
            return Err(TokenError::NotAllowed);
        }
        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::EmptySecret)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn issuer() -> ChatTokenIssuer {
        ChatTokenIssuer::new("test-signing-key", Duration::from_secs(7200)).unwrap()
    }

    #[test]
    fn issued_token_verifies_until_expiry() {
        let issuer = issuer();
        let issued = issuer.issue_at(true, NOW).unwrap();
        assert_eq!(issued.claims.iat, NOW);
        assert_eq!(issued.claims.exp, NOW + 7200);
        assert!(issued.claims.allowed);

        let claims = issuer.verify_at(&issued.token, NOW + 7199).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(issuer.verify_at(&issued.token, NOW + 7200), Err(TokenError::Expired));
    }

    #[test]
    fn refuses_to_issue_without_verification() {
        assert_eq!(issuer().issue_at(false, NOW).unwrap_err(), TokenError::VerificationFailed);
    }

    #[test]
    fn expired_token_is_rejected_even_with_a_valid_signature() {
        let issuer = issuer();
        let issued = issuer.issue_at(true, NOW - 10_000).unwrap();
        assert_eq!(issuer.verify_at(&issued.token, NOW), Err(TokenError::Expired));
    }

    #[test]
    fn token_signed_with_another_key_is_rejected() {
        let other = ChatTokenIssuer::new("someone-else", Duration::from_secs(7200)).unwrap();
        let forged = other.issue_at(true, NOW).unwrap();
        assert_eq!(issuer().verify_at(&forged.token, NOW), Err(TokenError::BadSignature));
    }

    #[test]
    fn tampered_claims_break_the_signature() {
        let issuer = issuer();
        let issued = issuer.issue_at(true, NOW).unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();
        let extended = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&ChatClaims { allowed: true, iat: NOW, exp: NOW + 999_999 }).unwrap()
        );
        let tampered = format!("{}.{}.{}", parts[0], extended, parts[2]);
        assert_eq!(issuer.verify_at(&tampered, NOW), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_malformed_and_unsigned_tokens() {
        let issuer = issuer();
        assert_eq!(issuer.verify_at("", NOW), Err(TokenError::Malformed));
        assert_eq!(issuer.verify_at("a.b", NOW), Err(TokenError::Malformed));
        assert_eq!(issuer.verify_at("a.b.c.d", NOW), Err(TokenError::Malformed));

        let none_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"allowed":true,"iat":0,"exp":9999999999}"#);
        let unsigned = format!("{}.{}.", none_header, claims);
        assert_eq!(
            issuer.verify_at(&unsigned, NOW),
            Err(TokenError::UnsupportedAlgorithm("none".into()))
        );
    }

    #[test]
    fn huge_ttl_saturates_instead_of_wrapping() {
        let issuer = ChatTokenIssuer::new("test-signing-key", Duration::from_secs(u64::MAX)).unwrap();
        let issued = issuer.issue_at(true, NOW).unwrap();
        assert_eq!(issued.claims.exp, i64::MAX);
        assert!(issuer.verify_at(&issued.token, NOW + 1).is_ok());
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(
            ChatTokenIssuer::new("", Duration::from_secs(60)),
            Err(TokenError::EmptySecret)
        ));
    }
}

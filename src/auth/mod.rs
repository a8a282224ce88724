pub mod token;
pub mod verifier;

pub use token::{ ChatClaims, ChatTokenIssuer, IssuedToken, TokenError };
pub use verifier::{ BotVerifier, TurnstileVerifier };

//! Handshake token verification.
//!
//! Token *issuance* is out of scope — some external auth service signs
//! HS256 JWTs with a shared secret and hands them to clients. This
//! module only verifies them at WebSocket handshake time; a connection
//! whose first frame does not carry a valid token is rejected before
//! any board event is processed.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub username: String,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

/// Handshake authentication errors. Any of these is terminal for the
/// connection.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Verifies session tokens against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Verify a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = decode::<Claims>(token, &self.key, &Validation::default())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(data.claims)
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn sign(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(name: &str) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            username: name.into(),
            exp: (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + 3600) as usize,
        }
    }

    #[test]
    fn test_valid_token_accepted() {
        let verifier = TokenVerifier::new("secret");
        let claims = claims_for("Alice");
        let token = sign("secret", &claims);

        let verified = verifier.verify(&token).unwrap();
        assert_eq!(verified.sub, claims.sub);
        assert_eq!(verified.username, "Alice");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = TokenVerifier::new("secret");
        let token = sign("other-secret", &claims_for("Mallory"));
        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_empty_token_rejected() {
        let verifier = TokenVerifier::new("secret");
        assert!(matches!(verifier.verify(""), Err(AuthError::MissingToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::new("secret");
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "Alice".into(),
            exp: 1, // long past
        };
        let token = sign("secret", &claims);
        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let verifier = TokenVerifier::new("secret");
        assert!(verifier.verify("not.a.jwt").is_err());
    }
}

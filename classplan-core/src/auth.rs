use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{ClassplanError, CoreResult};

/// A verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
}

/// Turns a bearer token into a verified identity, or fails with
/// `Unauthorized`. Token issuance lives with the external identity
/// provider; this side only checks.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> CoreResult<AuthUser>;
}

/// Fixed token table (token -> uid) driven by config. Used in development
/// and tests; production wires in the real identity service instead.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: &str, uid: &str) -> Self {
        self.tokens.insert(token.to_string(), uid.to_string());
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> CoreResult<AuthUser> {
        match self.tokens.get(token) {
            Some(uid) => Ok(AuthUser { uid: uid.clone() }),
            None => Err(ClassplanError::Unauthorized("invalid token".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_token_yields_uid() {
        let verifier = StaticTokenVerifier::default().with_token("tok-1", "teacher-1");
        let user = verifier.verify("tok-1").await.unwrap();
        assert_eq!(user.uid, "teacher-1");
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let verifier = StaticTokenVerifier::default();
        let err = verifier.verify("nope").await.unwrap_err();
        assert!(matches!(err, ClassplanError::Unauthorized(_)));
    }
}

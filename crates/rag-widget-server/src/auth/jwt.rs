use anyhow::Result;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Claims issued by the external auth provider. `sub` carries the user id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token for `user_id`; used by tests and local tooling. In
    /// production the auth provider signs with the shared secret.
    pub fn generate_token(&self, user_id: Uuid, ttl_seconds: u64) -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl_seconds as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_subject() {
        let manager = JwtManager::new("test-secret");
        let user_id = Uuid::new_v4();

        let token = manager.generate_token(user_id, 3600).unwrap();
        let claims = manager.validate_token(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let manager = JwtManager::new("test-secret");
        let other = JwtManager::new("other-secret");

        let token = manager.generate_token(Uuid::new_v4(), 3600).unwrap();
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = JwtManager::new("test-secret");
        let token = manager.generate_token(Uuid::new_v4(), 0).unwrap();
        assert!(manager.validate_token(&token).is_err());
    }
}

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::database::{Repository, WidgetToken};

const TOKEN_BYTES: usize = 64;
const PREFIX_CHARS: usize = 8;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("unknown token")]
    NotFound,

    #[error("token expired")]
    Expired,

    #[error("origin not allowed for this token")]
    DomainNotAllowed,

    #[error("token lookup failed: {0}")]
    Internal(String),
}

/// Issues and validates opaque widget tokens. Only the SHA-256 of the
/// plaintext is ever stored; the plaintext leaves this module exactly once,
/// at creation.
pub struct WidgetTokenService {
    repository: Arc<Repository>,
}

impl WidgetTokenService {
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    /// Create a token for `bot_id`. Returns the stored row and the one-time
    /// plaintext.
    pub async fn issue(
        &self,
        bot_id: Uuid,
        allowed_domains: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
        name: Option<String>,
    ) -> Result<(WidgetToken, String), TokenError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill(&mut bytes[..]);
        let plaintext = URL_SAFE_NO_PAD.encode(bytes);
        let token_hash = hash_token(&plaintext);
        let prefix: String = plaintext.chars().take(PREFIX_CHARS).collect();

        let domains: Vec<String> = allowed_domains
            .iter()
            .filter_map(|d| normalize_domain(d))
            .collect();

        let token = self
            .repository
            .insert_widget_token(
                bot_id,
                &token_hash,
                &prefix,
                &domains,
                expires_at,
                name.as_deref(),
            )
            .await
            .map_err(|e| TokenError::Internal(e.to_string()))?;

        Ok((token, plaintext))
    }

    /// Validate a presented bearer token against its hash, expiry, and the
    /// request origin. On success the caller is scoped to `token.bot_id`.
    pub async fn validate(
        &self,
        bearer: &str,
        origin: Option<&str>,
        referer: Option<&str>,
    ) -> Result<WidgetToken, TokenError> {
        let token_hash = hash_token(bearer.trim());

        let token = self
            .repository
            .find_widget_token_by_hash(&token_hash)
            .await
            .map_err(|e| TokenError::Internal(e.to_string()))?
            .ok_or(TokenError::NotFound)?;

        if let Some(expires_at) = token.expires_at {
            if Utc::now() >= expires_at {
                return Err(TokenError::Expired);
            }
        }

        let host = origin
            .and_then(host_of)
            .or_else(|| referer.and_then(host_of))
            .ok_or(TokenError::DomainNotAllowed)?;

        if !domain_allowed(&token.allowed_domains, &host) {
            debug!(host, token = %token.id, "widget origin rejected");
            return Err(TokenError::DomainNotAllowed);
        }

        if let Err(e) = self.repository.touch_widget_token(token.id).await {
            warn!("failed to update token last_used_at: {}", e);
        }

        Ok(token)
    }
}

pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Allowed-domain entries may be bare hosts or full origins; both collapse
/// to a lowercase host.
fn normalize_domain(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    if entry.contains("://") {
        host_of(entry)
    } else {
        Some(entry.trim_end_matches('/').to_ascii_lowercase())
    }
}

fn host_of(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == "null" {
        return None;
    }
    if let Ok(url) = Url::parse(value) {
        return url.host_str().map(|h| h.to_ascii_lowercase());
    }
    // A bare host is fine too.
    if !value.contains('/') && !value.contains(' ') {
        return Some(value.to_ascii_lowercase());
    }
    None
}

/// Strict exact-host comparison, case-insensitive.
fn domain_allowed(allowed: &[String], host: &str) -> bool {
    allowed.iter().any(|d| d.eq_ignore_ascii_case(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sha256_hex() {
        let hash = hash_token("my-token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("my-token"));
        assert_ne!(hash, hash_token("other-token"));
    }

    #[test]
    fn origins_reduce_to_hosts() {
        assert_eq!(host_of("https://Example.COM"), Some("example.com".into()));
        assert_eq!(
            host_of("https://example.com:8443/page?x=1"),
            Some("example.com".into())
        );
        assert_eq!(host_of("example.com"), Some("example.com".into()));
        assert_eq!(host_of("null"), None);
        assert_eq!(host_of(""), None);
    }

    #[test]
    fn domain_match_is_exact_and_case_insensitive() {
        let allowed = vec!["example.com".to_string()];
        assert!(domain_allowed(&allowed, "EXAMPLE.com"));
        assert!(!domain_allowed(&allowed, "sub.example.com"));
        assert!(!domain_allowed(&allowed, "evil.test"));
    }

    #[test]
    fn domain_entries_normalize_to_hosts() {
        assert_eq!(
            normalize_domain("https://Shop.Example.com/"),
            Some("shop.example.com".into())
        );
        assert_eq!(normalize_domain("Example.COM"), Some("example.com".into()));
        assert_eq!(normalize_domain("  "), None);
    }
}

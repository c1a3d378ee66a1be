//! Cart ownership: who a request is shopping as.
//!
//! A signed-in buyer is identified by the bearer token's subject. Everyone
//! else is an anonymous session carried in a signed cookie. Reads never mint
//! a session; only write paths go through [`SessionResolver::resolve_or_issue`].

pub mod cookie;

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError};
use cookie::{mint_session_token, removal_cookie, session_cookie, SESSION_COOKIE};

/// Identity a cart belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CartOwner {
    User { id: Uuid },
    AnonymousSession { token: String },
}

impl CartOwner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User { id } => Some(*id),
            Self::AnonymousSession { .. } => None,
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        match self {
            Self::User { .. } => None,
            Self::AnonymousSession { token } => Some(token),
        }
    }

    /// Compact reference stored in gateway order notes so the webhook can
    /// find the cart without a browser session.
    pub fn to_reference(&self) -> String {
        match self {
            Self::User { id } => format!("user:{}", id),
            Self::AnonymousSession { token } => format!("anon:{}", token),
        }
    }

    pub fn from_reference(reference: &str) -> Option<Self> {
        let (kind, value) = reference.split_once(':')?;
        match kind {
            "user" => Uuid::parse_str(value).ok().map(|id| Self::User { id }),
            "anon" if !value.is_empty() => Some(Self::AnonymousSession {
                token: value.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for CartOwner {
    // Never print the raw session token; it is a bearer credential.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { id } => write!(f, "user:{}", id),
            Self::AnonymousSession { token } => {
                write!(f, "anon:{}…", token.chars().take(6).collect::<String>())
            }
        }
    }
}

/// Bearer token claims. Only the subject is read here; issuing tokens
/// belongs to the sign-in flow.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Resolves request identity from the bearer header and the session cookie.
#[derive(Clone)]
pub struct SessionResolver {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    secure_cookies: bool,
}

impl fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionResolver")
            .field("secure_cookies", &self.secure_cookies)
            .finish_non_exhaustive()
    }
}

impl SessionResolver {
    pub fn new(jwt_secret: &str, secure_cookies: bool) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            secure_cookies,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.is_production())
    }

    /// Signing key for the session cookie jar.
    pub fn cookie_key(config: &AppConfig) -> Result<Key, ServiceError> {
        Key::try_from(config.cookie_secret.as_bytes()).map_err(|e| {
            ServiceError::InternalError(format!("cookie_secret unusable as signing key: {}", e))
        })
    }

    /// User id from a valid bearer token. Missing, malformed or expired
    /// tokens all yield `None`.
    pub fn authenticated_user(&self, headers: &HeaderMap) -> Option<Uuid> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();

        match decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256)) {
            Ok(data) => Uuid::parse_str(&data.claims.sub).ok(),
            Err(err) => {
                debug!("Ignoring invalid bearer token: {}", err);
                None
            }
        }
    }

    /// Like [`Self::authenticated_user`] but for routes that need a signed-in buyer.
    pub fn require_user(&self, headers: &HeaderMap) -> Result<Uuid, ServiceError> {
        self.authenticated_user(headers)
            .ok_or_else(|| ServiceError::Unauthorized("Sign in required".to_string()))
    }

    /// Anonymous session token from the signed cookie, if present.
    pub fn guest_token(&self, jar: &SignedCookieJar) -> Option<String> {
        jar.get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Read path: never issues a cookie.
    pub fn resolve(&self, headers: &HeaderMap, jar: &SignedCookieJar) -> Option<CartOwner> {
        if let Some(id) = self.authenticated_user(headers) {
            return Some(CartOwner::User { id });
        }
        self.guest_token(jar)
            .map(|token| CartOwner::AnonymousSession { token })
    }

    /// Write path: mints and sets a session cookie when the caller has no
    /// identity yet. An existing guest cookie is re-issued to slide its expiry.
    pub fn resolve_or_issue(
        &self,
        headers: &HeaderMap,
        jar: SignedCookieJar,
    ) -> (CartOwner, SignedCookieJar) {
        if let Some(id) = self.authenticated_user(headers) {
            return (CartOwner::User { id }, jar);
        }

        let token = self.guest_token(&jar).unwrap_or_else(mint_session_token);
        let jar = jar.add(session_cookie(token.clone(), self.secure_cookies));
        (CartOwner::AnonymousSession { token }, jar)
    }

    pub fn clear_guest_cookie(&self, jar: SignedCookieJar) -> SignedCookieJar {
        jar.remove(removal_cookie())
    }

    /// Signs a short-lived bearer token for `user_id`.
    pub fn issue_token(&self, user_id: Uuid, ttl_secs: i64) -> Result<String, ServiceError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("token signing failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "unit-test-jwt-secret-with-enough-length";

    fn jar() -> SignedCookieJar {
        SignedCookieJar::new(Key::generate())
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn owner_reference_round_trips() {
        let user = CartOwner::User { id: Uuid::new_v4() };
        let guest = CartOwner::AnonymousSession {
            token: "abc_DEF-123".into(),
        };
        assert_eq!(CartOwner::from_reference(&user.to_reference()), Some(user));
        assert_eq!(
            CartOwner::from_reference(&guest.to_reference()),
            Some(guest)
        );
        assert_eq!(CartOwner::from_reference("anon:"), None);
        assert_eq!(CartOwner::from_reference("user:not-a-uuid"), None);
        assert_eq!(CartOwner::from_reference("garbage"), None);
    }

    #[test]
    fn display_masks_session_token() {
        let guest = CartOwner::AnonymousSession {
            token: "abcdefghijklmnop".into(),
        };
        assert!(!guest.to_string().contains("ghijklmnop"));
    }

    #[test]
    fn valid_bearer_resolves_user() {
        let resolver = SessionResolver::new(SECRET, false);
        let user_id = Uuid::new_v4();
        let token = resolver.issue_token(user_id, 300).unwrap();

        assert_eq!(
            resolver.resolve(&bearer(&token), &jar()),
            Some(CartOwner::User { id: user_id })
        );
    }

    #[test]
    fn bearer_signed_with_other_secret_is_ignored() {
        let other = SessionResolver::new("a-completely-different-secret-value!!", false);
        let token = other.issue_token(Uuid::new_v4(), 300).unwrap();

        let resolver = SessionResolver::new(SECRET, false);
        assert_eq!(resolver.authenticated_user(&bearer(&token)), None);
        assert!(resolver.require_user(&bearer(&token)).is_err());
    }

    #[test]
    fn expired_bearer_is_ignored() {
        let resolver = SessionResolver::new(SECRET, false);
        let token = resolver.issue_token(Uuid::new_v4(), -3600).unwrap();
        assert_eq!(resolver.authenticated_user(&bearer(&token)), None);
    }

    #[test]
    fn read_path_without_cookie_yields_no_owner() {
        let resolver = SessionResolver::new(SECRET, false);
        assert_eq!(resolver.resolve(&HeaderMap::new(), &jar()), None);
    }

    #[test]
    fn write_path_mints_then_reuses_session() {
        let resolver = SessionResolver::new(SECRET, true);
        let (owner, jar) = resolver.resolve_or_issue(&HeaderMap::new(), jar());
        let token = owner.session_token().unwrap().to_string();

        let cookie = jar.get(SESSION_COOKIE).unwrap();
        assert_eq!(cookie.value(), token);

        let (again, _) = resolver.resolve_or_issue(&HeaderMap::new(), jar.clone());
        assert_eq!(again, owner);
        assert_eq!(resolver.resolve(&HeaderMap::new(), &jar), Some(owner));
    }

    #[test]
    fn clearing_removes_guest_identity() {
        let resolver = SessionResolver::new(SECRET, false);
        let (_, jar) = resolver.resolve_or_issue(&HeaderMap::new(), jar());
        let jar = resolver.clear_guest_cookie(jar);
        assert_eq!(resolver.guest_token(&jar), None);
    }

    #[test]
    fn short_cookie_secret_is_rejected() {
        let mut config = AppConfig::new(
            "sqlite::memory:".into(),
            SECRET.into(),
            "short".into(),
            "k".into(),
            "s".into(),
            "w".into(),
            "development".into(),
        );
        assert!(SessionResolver::cookie_key(&config).is_err());
        config.cookie_secret = "x".repeat(64);
        assert!(SessionResolver::cookie_key(&config).is_ok());
    }
}

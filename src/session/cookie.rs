use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// Name of the signed cookie carrying the anonymous session token
pub const SESSION_COOKIE: &str = "storefront_session";

/// Guest sessions last thirty days from the last write that touched them.
pub const SESSION_MAX_AGE_DAYS: i64 = 30;

const TOKEN_BYTES: usize = 32;

/// Mints a fresh anonymous session token: 32 random bytes, URL-safe base64.
pub fn mint_session_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds the session cookie. `Secure` is only set in production so local
/// development over plain HTTP keeps working.
pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::days(SESSION_MAX_AGE_DAYS))
        .build()
}

/// Cookie used to expire the session cookie on the client.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_url_safe_and_unique() {
        let a = mint_session_token();
        let b = mint_session_token();
        assert_ne!(a, b);
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = session_cookie("tok".into(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(30)));
    }

    #[test]
    fn insecure_outside_production() {
        let cookie = session_cookie("tok".into(), false);
        assert_eq!(cookie.secure(), Some(false));
    }
}

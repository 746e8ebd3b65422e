//! One-shot notice cookies.
//!
//! Soft failures (ownership violations, duplicate votes) and auth redirects
//! carry a user-visible message across the redirect in a `notice` cookie.
//! The next rendered view takes the message and clears the cookie. The
//! message text is base64-encoded so it stays cookie-safe.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Cookie holding the pending notice message
pub const NOTICE_COOKIE: &str = "notice";

/// Queue a notice for the next rendered view
pub fn push_notice(jar: CookieJar, message: &str) -> CookieJar {
    let mut cookie = Cookie::new(NOTICE_COOKIE, URL_SAFE_NO_PAD.encode(message.as_bytes()));
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    jar.add(cookie)
}

/// Take the pending notice, clearing the cookie
pub fn take_notice(jar: CookieJar) -> (CookieJar, Option<String>) {
    match jar.get(NOTICE_COOKIE) {
        Some(cookie) => {
            let message = URL_SAFE_NO_PAD
                .decode(cookie.value().as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            let mut removal = Cookie::new(NOTICE_COOKIE, "");
            removal.set_path("/");
            (jar.remove(removal), message)
        }
        None => (jar, None),
    }
}

/// 302 redirect to an application path.
///
/// Post-action navigation in the browser flow is always a plain 302, never
/// an error status.
pub fn redirect(location: &str) -> Response {
    let location = HeaderValue::try_from(location)
        .unwrap_or_else(|_| HeaderValue::from_static("/question/list"));
    (StatusCode::FOUND, [(header::LOCATION, location)], ()).into_response()
}

/// Redirect carrying a notice for the destination view
pub fn redirect_with_notice(jar: CookieJar, location: &str, message: &str) -> Response {
    (push_notice(jar, message), redirect(location)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_take_round_trips() {
        let jar = push_notice(CookieJar::new(), "You have already voted on this post");
        let (jar, message) = take_notice(jar);

        assert_eq!(
            message.as_deref(),
            Some("You have already voted on this post")
        );

        // Taking again yields nothing: the notice is one-shot.
        let (_jar, message) = take_notice(jar);
        assert_eq!(message, None);
    }

    #[test]
    fn test_take_without_notice() {
        let (_jar, message) = take_notice(CookieJar::new());
        assert_eq!(message, None);
    }

    #[test]
    fn test_redirect_is_found() {
        let response = redirect("/question/detail/3");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/question/detail/3"
        );
    }

    #[test]
    fn test_redirect_with_notice_sets_cookie() {
        let response = redirect_with_notice(CookieJar::new(), "/question/list", "nope");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }
}

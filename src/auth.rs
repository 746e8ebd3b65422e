//! # Authentication Module
//!
//! Account registration, login and the per-request session gate.
//!
//! ## Features
//! - Signup/login with username and password
//! - Argon2id password hashing
//! - Server-side sessions with random tokens, carried in an HttpOnly cookie
//!
//! Every mutating route resolves the current user from the session cookie;
//! the resolved user is then threaded into the access layer as an explicit
//! actor, never read from ambient state.

use crate::db::{BoardStore, SqlValue};
use crate::error::{BoardError, BoardResult, FormErrors};
use crate::flash;
use crate::models::{now_text, row_to_user, timestamp, User};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Session lifetime (7 days)
const SESSION_DURATION_DAYS: i64 = 7;

/// Minimum password length
const MIN_PASSWORD_LENGTH: usize = 8;

// ============================================================================
// Core Types
// ============================================================================

/// Authentication service managing users and sessions
#[derive(Clone)]
pub struct AuthService {
    store: Arc<BoardStore>,
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

// ============================================================================
// AuthService Implementation
// ============================================================================

impl AuthService {
    pub fn new(store: Arc<BoardStore>) -> Self {
        Self { store }
    }

    /// Hash a password using Argon2id
    fn hash_password(&self, password: &str) -> BoardResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| BoardError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))
    }

    /// Verify a password against its hash
    fn verify_password(&self, password: &str, hash: &str) -> BoardResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| BoardError::Internal(anyhow::anyhow!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Generate a secure random session token
    fn generate_token() -> String {
        use base64::Engine;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    async fn validate_signup(&self, form: &SignupForm) -> BoardResult<()> {
        let mut errors = FormErrors::new()
            .value("username", &form.username)
            .value("email", &form.email);

        if form.username.trim().is_empty() {
            errors.push("username", "Username is required");
        }
        if form.email.trim().is_empty() {
            errors.push("email", "Email is required");
        } else if !form.email.contains('@') || form.email.len() < 5 {
            errors.push("email", "Invalid email format");
        }
        if form.password1.len() < MIN_PASSWORD_LENGTH {
            errors.push(
                "password1",
                &format!("Password must be at least {} characters", MIN_PASSWORD_LENGTH),
            );
        }
        if form.password1 != form.password2 {
            errors.push("password2", "Passwords do not match");
        }

        if !form.username.trim().is_empty() {
            let taken = self
                .store
                .query_one(
                    "SELECT id FROM users WHERE username = ?1".to_string(),
                    vec![SqlValue::Text(form.username.clone())],
                    |row| row.get::<_, i64>(0),
                )
                .await?;
            if taken.is_some() {
                errors.push("username", "That username is already in use");
            }
        }
        if form.email.contains('@') {
            let taken = self
                .store
                .query_one(
                    "SELECT id FROM users WHERE email = ?1".to_string(),
                    vec![SqlValue::Text(form.email.clone())],
                    |row| row.get::<_, i64>(0),
                )
                .await?;
            if taken.is_some() {
                errors.push("email", "That email is already in use");
            }
        }

        errors.into_result()
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Register a new user and open a session for them
    pub async fn signup(&self, form: SignupForm) -> BoardResult<(User, String)> {
        self.validate_signup(&form).await?;

        let password_hash = self.hash_password(&form.password1)?;
        let user_id = self
            .store
            .insert(
                "INSERT INTO users (username, password_hash, email, created_at) \
                 VALUES (?1, ?2, ?3, ?4)"
                    .to_string(),
                vec![
                    SqlValue::Text(form.username.clone()),
                    SqlValue::Text(password_hash),
                    SqlValue::Text(form.email.clone()),
                    SqlValue::Text(now_text()),
                ],
            )
            .await?;

        info!("New user registered: {}", form.username);

        let user = self.user_by_id(user_id).await?;
        let token = self.create_session(user.id).await?;
        Ok((user, token))
    }

    /// Authenticate a user and open a session.
    ///
    /// A wrong username and a wrong password produce the same field error.
    pub async fn login(&self, form: LoginForm) -> BoardResult<(User, String)> {
        let credentials_error = |username: &str| {
            let mut errors = FormErrors::new().value("username", username);
            errors.push("password", "Unknown username or wrong password");
            BoardError::Validation(errors)
        };

        let row = self
            .store
            .query_one(
                "SELECT id, password_hash FROM users WHERE username = ?1".to_string(),
                vec![SqlValue::Text(form.username.clone())],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .await?;

        let (user_id, password_hash) = match row {
            Some(row) => row,
            None => return Err(credentials_error(&form.username)),
        };

        if !self.verify_password(&form.password, &password_hash)? {
            return Err(credentials_error(&form.username));
        }

        let user = self.user_by_id(user_id).await?;
        info!("User logged in: {}", user.username);

        let token = self.create_session(user.id).await?;
        Ok((user, token))
    }

    /// Logout - remove the session row
    pub async fn logout(&self, token: &str) -> BoardResult<()> {
        self.store
            .execute(
                "DELETE FROM sessions WHERE token = ?1".to_string(),
                vec![SqlValue::Text(token.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Get user by ID
    pub async fn user_by_id(&self, id: i64) -> BoardResult<User> {
        self.store
            .query_one(
                "SELECT id, username, email, created_at FROM users WHERE id = ?1".to_string(),
                vec![SqlValue::Integer(id)],
                row_to_user,
            )
            .await?
            .ok_or_else(|| BoardError::NotFound("user".to_string()))
    }

    // ========================================================================
    // Session Gate
    // ========================================================================

    async fn create_session(&self, user_id: i64) -> BoardResult<String> {
        let token = Self::generate_token();
        let expires_at = Utc::now() + Duration::days(SESSION_DURATION_DAYS);

        self.store
            .insert(
                "INSERT INTO sessions (user_id, token, expires_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4)"
                    .to_string(),
                vec![
                    SqlValue::Integer(user_id),
                    SqlValue::Text(token.clone()),
                    SqlValue::Text(timestamp(expires_at)),
                    SqlValue::Text(now_text()),
                ],
            )
            .await?;

        Ok(token)
    }

    /// Resolve the session cookie to a user. Expired or unknown tokens
    /// resolve to None.
    pub async fn current_user(&self, jar: &CookieJar) -> BoardResult<Option<User>> {
        let token = match jar.get(SESSION_COOKIE) {
            Some(cookie) => cookie.value().to_string(),
            None => return Ok(None),
        };

        self.store
            .query_one(
                "SELECT u.id, u.username, u.email, u.created_at \
                 FROM sessions s JOIN users u ON u.id = s.user_id \
                 WHERE s.token = ?1 AND s.expires_at > ?2"
                    .to_string(),
                vec![SqlValue::Text(token), SqlValue::Text(now_text())],
                row_to_user,
            )
            .await
    }

    /// The gate every mutating handler runs first
    pub async fn require_user(&self, jar: &CookieJar) -> BoardResult<User> {
        self.current_user(jar)
            .await?
            .ok_or(BoardError::Unauthenticated)
    }
}

fn session_cookie(token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie
}

// ============================================================================
// API Handlers
// ============================================================================

/// App state for the auth routes
#[derive(Clone)]
pub struct AuthState {
    pub auth: AuthService,
}

/// GET /auth/signup
async fn signup_form_handler(jar: CookieJar) -> Response {
    let (jar, notice) = flash::take_notice(jar);
    (
        jar,
        Json(json!({
            "values": { "username": "", "email": "" },
            "errors": {},
            "notice": notice,
        })),
    )
        .into_response()
}

/// POST /auth/signup
async fn signup_handler(
    State(state): State<AuthState>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> Result<Response, BoardError> {
    let (user, token) = state.auth.signup(form).await?;
    let jar = flash::push_notice(
        jar.add(session_cookie(token)),
        &format!("Welcome, {}", user.username),
    );
    Ok((jar, flash::redirect("/question/list")).into_response())
}

/// GET /auth/login
async fn login_form_handler(jar: CookieJar) -> Response {
    let (jar, notice) = flash::take_notice(jar);
    (
        jar,
        Json(json!({
            "values": { "username": "" },
            "errors": {},
            "notice": notice,
        })),
    )
        .into_response()
}

/// POST /auth/login
async fn login_handler(
    State(state): State<AuthState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, BoardError> {
    let (user, token) = state.auth.login(form).await?;
    let jar = flash::push_notice(
        jar.add(session_cookie(token)),
        &format!("Signed in as {}", user.username),
    );
    Ok((jar, flash::redirect("/question/list")).into_response())
}

/// GET /auth/logout
async fn logout_handler(
    State(state): State<AuthState>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    if let Some(token) = token {
        state.auth.logout(&token).await?;
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    let jar = jar.remove(removal);

    Ok((jar, flash::redirect("/question/list")).into_response())
}

// ============================================================================
// Router
// ============================================================================

/// Creates the auth router with signup, login and logout
pub fn create_auth_router(state: AuthState) -> Router {
    Router::new()
        .route("/signup", get(signup_form_handler).post(signup_handler))
        .route("/login", get(login_form_handler).post(login_handler))
        .route("/logout", get(logout_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn create_test_service() -> AuthService {
        let store = Arc::new(BoardStore::in_memory().await.unwrap());
        store.initialize_schema().await.unwrap();
        AuthService::new(store)
    }

    fn signup_form(username: &str) -> SignupForm {
        SignupForm {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password1: "password123".to_string(),
            password2: "password123".to_string(),
        }
    }

    fn jar_with_session(token: &str) -> CookieJar {
        CookieJar::new().add(Cookie::new(SESSION_COOKIE, token.to_string()))
    }

    #[tokio::test]
    async fn test_password_hashing() {
        let service = create_test_service().await;
        let password = "supersecret123";

        let hash = service.hash_password(password).unwrap();
        assert!(service.verify_password(password, &hash).unwrap());
        assert!(!service.verify_password("wrongpassword", &hash).unwrap());
    }

    #[tokio::test]
    async fn test_signup_opens_session() {
        let service = create_test_service().await;

        let (user, token) = service.signup(signup_form("alice")).await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(!token.is_empty());

        let current = service.current_user(&jar_with_session(&token)).await.unwrap();
        assert_eq!(current.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn test_signup_rejects_duplicate_username() {
        let service = create_test_service().await;
        service.signup(signup_form("alice")).await.unwrap();

        let mut form = signup_form("alice");
        form.email = "other@example.com".to_string();
        let err = service.signup(form).await.unwrap_err();

        match err {
            BoardError::Validation(form) => assert!(form.errors.contains_key("username")),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signup_rejects_password_mismatch() {
        let service = create_test_service().await;

        let mut form = signup_form("alice");
        form.password2 = "different123".to_string();
        let err = service.signup(form).await.unwrap_err();

        match err {
            BoardError::Validation(form) => assert!(form.errors.contains_key("password2")),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_flow() {
        let service = create_test_service().await;
        service.signup(signup_form("alice")).await.unwrap();

        let (user, token) = service
            .login(LoginForm {
                username: "alice".to_string(),
                password: "password123".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let service = create_test_service().await;
        service.signup(signup_form("alice")).await.unwrap();

        let err = service
            .login(LoginForm {
                username: "alice".to_string(),
                password: "not-the-password".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            BoardError::Validation(form) => assert!(form.errors.contains_key("password")),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let service = create_test_service().await;
        let (user, _token) = service.signup(signup_form("alice")).await.unwrap();

        let expired = timestamp(Utc::now() - Duration::days(1));
        service
            .store
            .insert(
                "INSERT INTO sessions (user_id, token, expires_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4)"
                    .to_string(),
                vec![
                    SqlValue::Integer(user.id),
                    SqlValue::Text("stale-token".to_string()),
                    SqlValue::Text(expired),
                    SqlValue::Text(now_text()),
                ],
            )
            .await
            .unwrap();

        let current = service
            .current_user(&jar_with_session("stale-token"))
            .await
            .unwrap();
        assert!(current.is_none());
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let service = create_test_service().await;
        let (_user, token) = service.signup(signup_form("alice")).await.unwrap();

        service.logout(&token).await.unwrap();

        let current = service.current_user(&jar_with_session(&token)).await.unwrap();
        assert!(current.is_none());

        let err = service
            .require_user(&jar_with_session(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_signup_route_sets_cookie_and_redirects() {
        let service = create_test_service().await;
        let router = create_auth_router(AuthState { auth: service });

        let request = Request::builder()
            .method("POST")
            .uri("/signup")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(
                "username=alice&email=alice%40example.com&password1=password123&password2=password123",
            ))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/question/list"
        );

        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("session=")));
    }
}

//! The user session: one optional bearer token plus the actions that change it.
//!
//! The token lives in two places, memory and a `TokenStore`. Every mutation
//! goes through `&mut self`, writes the durable copy first and only then
//! touches memory, so the two never disagree after an action returns.

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::api::{ApiClient, ApiError, QueryResponse, UserProfile};
use crate::notify::{FailureReason, Outcome};

use super::store::non_blank;
use super::TokenStore;

pub const LOGIN_SUCCESS_MESSAGE: &str = "Logged in successfully!";
pub const LOGIN_REJECTED_MESSAGE: &str = "Incorrect username or password.";
pub const REGISTER_SUCCESS_MESSAGE: &str = "Registration successful, please log in!";
pub const REGISTER_FALLBACK_MESSAGE: &str = "An unknown error occurred during registration.";
pub const UNREACHABLE_MESSAGE: &str =
    "Unable to connect to the server. Check your connection and try again.";
pub const SERVER_ERROR_MESSAGE: &str = "The server ran into a problem. Please try again later.";
pub const INVALID_RESPONSE_MESSAGE: &str = "The server sent an unexpected response.";
pub const STORAGE_ERROR_MESSAGE: &str = "Could not save the session on this device.";

pub struct Session {
    api: ApiClient,
    store: Box<dyn TokenStore>,
    token: Option<String>,
}

impl Session {
    /// Create a session, restoring any token an earlier run left behind.
    /// No request is made.
    pub fn new(api: ApiClient, store: Box<dyn TokenStore>) -> Self {
        let token = match store.load() {
            Ok(token) => token.and_then(non_blank),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session, starting logged out");
                None
            }
        };
        info!(logged_in = token.is_some(), store = %store.describe(), "Session initialized");

        Self { api, store, token }
    }

    /// Get the bearer token if logged in
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    pub fn store(&self) -> &dyn TokenStore {
        self.store.as_ref()
    }

    /// API client carrying the bearer token, for authenticated calls
    pub fn authorized_client(&self) -> Option<ApiClient> {
        self.token.clone().map(|token| self.api.with_token(token))
    }

    /// Exchange credentials for a token and persist it
    pub async fn login(&mut self, username: &str, password: &str) -> Outcome {
        let response = match self.api.issue_token(username, password).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, username, "Login failed");
                return Self::login_failure(&e);
            }
        };

        if !response.token_type.eq_ignore_ascii_case("bearer") {
            error!(token_type = %response.token_type, "Server issued an unsupported token type");
            return Outcome::failure(FailureReason::InvalidResponse, INVALID_RESPONSE_MESSAGE);
        }
        let Some(token) = non_blank(response.access_token) else {
            error!("Server issued an empty access token");
            return Outcome::failure(FailureReason::InvalidResponse, INVALID_RESPONSE_MESSAGE);
        };

        if let Err(e) = self.store.save(&token) {
            error!(error = %e, "Failed to persist session token");
            return Outcome::failure(FailureReason::Storage, STORAGE_ERROR_MESSAGE);
        }
        self.token = Some(token);

        info!(username, "Login successful");
        Outcome::success(LOGIN_SUCCESS_MESSAGE)
    }

    /// Forget the token locally. Makes no request and produces no notice.
    ///
    /// The in-memory token is always cleared; an error means only the
    /// durable copy could not be removed.
    pub fn logout(&mut self) -> Result<()> {
        self.token = None;
        self.store
            .clear()
            .context("Failed to remove persisted session")?;
        info!("Logged out");
        Ok(())
    }

    /// Create an account. Does not log in.
    pub async fn register(&mut self, username: &str, password: &str) -> Outcome {
        match self.api.create_user(username, password).await {
            Ok(()) => {
                info!(username, "Registration successful");
                Outcome::success(REGISTER_SUCCESS_MESSAGE)
            }
            Err(e) => {
                error!(error = %e, username, "Registration failed");
                Self::register_failure(&e)
            }
        }
    }

    /// Profile of the logged-in user. A 401 here means the server no longer
    /// accepts the token; deciding what to do about it is up to the caller.
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        let client = self.authorized_client().ok_or(ApiError::NotLoggedIn)?;
        client.current_user().await
    }

    /// Ask a question of the server's documents on behalf of the logged-in
    /// user. Rejected tokens are reported as `ApiError::Unauthorized`.
    pub async fn ask(&self, question: &str) -> Result<QueryResponse, ApiError> {
        let client = self.authorized_client().ok_or(ApiError::NotLoggedIn)?;
        client.query(question).await
    }

    fn login_failure(e: &ApiError) -> Outcome {
        match e {
            ApiError::Unauthorized { .. } | ApiError::NotLoggedIn => {
                Outcome::failure(FailureReason::Rejected, LOGIN_REJECTED_MESSAGE)
            }
            ApiError::Rejected { detail, .. } => Outcome::failure(
                FailureReason::Rejected,
                detail.as_deref().unwrap_or(LOGIN_REJECTED_MESSAGE),
            ),
            other => Self::transport_failure(other),
        }
    }

    fn register_failure(e: &ApiError) -> Outcome {
        let reason = match e {
            ApiError::NetworkError(_) => return Self::transport_failure(e),
            ApiError::ServerError(_) | ApiError::RateLimited => FailureReason::Server,
            ApiError::InvalidResponse(_) => FailureReason::InvalidResponse,
            _ => FailureReason::Rejected,
        };
        Outcome::failure(reason, e.detail().unwrap_or(REGISTER_FALLBACK_MESSAGE))
    }

    /// Failures where the server never judged the credentials
    fn transport_failure(e: &ApiError) -> Outcome {
        match e {
            ApiError::NetworkError(_) if e.is_connectivity() => {
                Outcome::failure(FailureReason::Unreachable, UNREACHABLE_MESSAGE)
            }
            // Got an answer but could not read it
            ApiError::NetworkError(_) | ApiError::InvalidResponse(_) => {
                Outcome::failure(FailureReason::InvalidResponse, INVALID_RESPONSE_MESSAGE)
            }
            _ => Outcome::failure(FailureReason::Server, SERVER_ERROR_MESSAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::config::Config;
    use crate::notify::NoticeKind;
    use anyhow::anyhow;
    use mockito::{Mock, Server};

    fn api_for(server: &Server) -> ApiClient {
        let config = Config {
            api_base_url: server.url(),
            ..Config::default()
        };
        ApiClient::new(&config).unwrap()
    }

    async fn token_mock(server: &mut Server, status: usize, body: &str) -> Mock {
        server
            .mock("POST", "/token")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// Store whose writes always fail
    struct BrokenStore;

    impl TokenStore for BrokenStore {
        fn load(&self) -> Result<Option<String>> {
            Err(anyhow!("unreadable"))
        }
        fn save(&self, _token: &str) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        fn clear(&self) -> Result<()> {
            Err(anyhow!("read-only"))
        }
        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    /// Store left holding a blank value by some other writer
    struct BlankStore;

    impl TokenStore for BlankStore {
        fn load(&self) -> Result<Option<String>> {
            Ok(Some(String::new()))
        }
        fn save(&self, _token: &str) -> Result<()> {
            Ok(())
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
        fn describe(&self) -> String {
            "blank".to_string()
        }
    }

    #[tokio::test]
    async fn test_login_success_persists_exact_token() {
        let mut server = Server::new_async().await;
        let mock = token_mock(&mut server, 200, r#"{"access_token": "jwt-abc", "token_type": "bearer"}"#).await;
        let store = MemoryTokenStore::new();
        let mut session = Session::new(api_for(&server), Box::new(store.clone()));

        let outcome = session.login("alice", "pw").await;

        mock.assert_async().await;
        assert!(outcome.is_success());
        assert_eq!(outcome.notice().message, LOGIN_SUCCESS_MESSAGE);
        assert_eq!(session.token(), Some("jwt-abc"));
        assert!(session.is_logged_in());
        assert_eq!(store.load().unwrap().as_deref(), Some("jwt-abc"));
    }

    #[tokio::test]
    async fn test_login_401_leaves_session_unchanged() {
        let mut server = Server::new_async().await;
        token_mock(&mut server, 401, r#"{"detail": "bad username or password"}"#).await;
        let store = MemoryTokenStore::with_token("old-token");
        let mut session = Session::new(api_for(&server), Box::new(store.clone()));

        let outcome = session.login("alice", "wrong").await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.failure_reason(), Some(FailureReason::Rejected));
        assert_eq!(outcome.notice().kind, NoticeKind::Error);
        assert_eq!(outcome.notice().message, LOGIN_REJECTED_MESSAGE);
        assert_eq!(session.token(), Some("old-token"));
        assert_eq!(store.load().unwrap().as_deref(), Some("old-token"));
    }

    #[tokio::test]
    async fn test_login_validation_error_shows_detail() {
        let mut server = Server::new_async().await;
        token_mock(
            &mut server,
            422,
            r#"{"detail": [{"loc": ["body", "password"], "msg": "Field required", "type": "missing"}]}"#,
        )
        .await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));

        let outcome = session.login("alice", "").await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::Rejected));
        assert_eq!(outcome.notice().message, "Field required");
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_server_error_is_not_reported_as_bad_password() {
        let mut server = Server::new_async().await;
        token_mock(&mut server, 500, "Internal Server Error").await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));

        let outcome = session.login("alice", "pw").await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::Server));
        assert_eq!(outcome.notice().message, SERVER_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_login_malformed_body() {
        let mut server = Server::new_async().await;
        token_mock(&mut server, 200, r#"{"token_type": "bearer"}"#).await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));

        let outcome = session.login("alice", "pw").await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::InvalidResponse));
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_empty_token_is_invalid_response() {
        let mut server = Server::new_async().await;
        token_mock(&mut server, 200, r#"{"access_token": "", "token_type": "bearer"}"#).await;
        let store = MemoryTokenStore::new();
        let mut session = Session::new(api_for(&server), Box::new(store.clone()));

        let outcome = session.login("a", "b").await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::InvalidResponse));
        assert!(!session.is_logged_in());
        assert_eq!(session.token(), None);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_non_bearer_token_is_invalid_response() {
        let mut server = Server::new_async().await;
        token_mock(&mut server, 200, r#"{"access_token": "mac-1", "token_type": "mac"}"#).await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));

        let outcome = session.login("a", "b").await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::InvalidResponse));
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_bearer_type_is_case_insensitive() {
        let mut server = Server::new_async().await;
        token_mock(&mut server, 200, r#"{"access_token": "jwt", "token_type": "Bearer"}"#).await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));

        assert!(session.login("a", "b").await.is_success());
    }

    #[tokio::test]
    async fn test_login_truncated_body_is_not_reported_as_unreachable() {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let responder = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            // Promise 100 bytes, send a few, hang up
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"acc",
            );
        });
        let config = Config {
            api_base_url: format!("http://127.0.0.1:{}", port),
            request_timeout_secs: 5,
            ..Config::default()
        };
        let mut session = Session::new(ApiClient::new(&config).unwrap(), Box::new(MemoryTokenStore::new()));

        let outcome = session.login("alice", "pw").await;
        responder.join().unwrap();

        assert_eq!(outcome.failure_reason(), Some(FailureReason::InvalidResponse));
        assert_eq!(outcome.notice().message, INVALID_RESPONSE_MESSAGE);
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_blank_persisted_token_starts_logged_out() {
        let session = Session::new(
            ApiClient::new(&Config::default()).unwrap(),
            Box::new(BlankStore),
        );
        assert!(!session.is_logged_in());
        assert_eq!(session.token(), None);
    }

    #[tokio::test]
    async fn test_ask_when_anonymous() {
        let server = Server::new_async().await;
        let session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));
        assert!(matches!(session.ask("Why?").await, Err(ApiError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_ask_uses_session_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/query")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"answer": "42", "source_documents": []}"#)
            .create_async()
            .await;
        let session = Session::new(api_for(&server), Box::new(MemoryTokenStore::with_token("tok")));

        let reply = session.ask("Meaning of life?").await.unwrap();
        mock.assert_async().await;
        assert_eq!(reply.answer, "42");
    }

    #[tokio::test]
    async fn test_ask_with_rejected_token() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(401)
            .with_body(r#"{"detail": "Could not validate credentials"}"#)
            .create_async()
            .await;
        let session = Session::new(api_for(&server), Box::new(MemoryTokenStore::with_token("stale")));

        assert!(matches!(session.ask("Hi?").await, Err(ApiError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_login_unreachable_server() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = Config {
            api_base_url: format!("http://127.0.0.1:{}", port),
            request_timeout_secs: 2,
            ..Config::default()
        };
        let mut session = Session::new(ApiClient::new(&config).unwrap(), Box::new(MemoryTokenStore::new()));

        let outcome = session.login("alice", "pw").await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::Unreachable));
        assert_eq!(outcome.notice().message, UNREACHABLE_MESSAGE);
    }

    #[tokio::test]
    async fn test_login_storage_failure_keeps_memory_and_disk_in_agreement() {
        let mut server = Server::new_async().await;
        token_mock(&mut server, 200, r#"{"access_token": "jwt"}"#).await;
        let mut session = Session::new(api_for(&server), Box::new(BrokenStore));

        let outcome = session.login("alice", "pw").await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::Storage));
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_unreadable_store_starts_logged_out() {
        let config = Config::default();
        let session = Session::new(ApiClient::new(&config).unwrap(), Box::new(BrokenStore));
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_logout_clears_both_copies() {
        let store = MemoryTokenStore::with_token("tok");
        let mut session = Session::new(ApiClient::new(&Config::default()).unwrap(), Box::new(store.clone()));
        assert!(session.is_logged_in());

        session.logout().unwrap();

        assert!(!session.is_logged_in());
        assert_eq!(session.token(), None);
        assert_eq!(store.load().unwrap(), None);

        // Logging out while anonymous is harmless
        session.logout().unwrap();
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_logout_storage_failure_still_logs_out() {
        let mut session = Session::new(ApiClient::new(&Config::default()).unwrap(), Box::new(BrokenStore));
        session.token = Some("tok".to_string());

        assert!(session.logout().is_err());
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_register_success_does_not_log_in() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/users/")
            .with_status(201)
            .with_body(r#"{"id": 3, "username": "bob", "is_active": true}"#)
            .create_async()
            .await;
        let store = MemoryTokenStore::new();
        let mut session = Session::new(api_for(&server), Box::new(store.clone()));

        let outcome = session.register("bob", "hunter22").await;

        mock.assert_async().await;
        assert!(outcome.is_success());
        assert_eq!(outcome.notice().message, REGISTER_SUCCESS_MESSAGE);
        assert!(!session.is_logged_in());
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_register_failure_uses_server_detail() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/users/")
            .with_status(400)
            .with_body(r#"{"detail": "username taken"}"#)
            .create_async()
            .await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));

        let outcome = session.register("bob", "hunter22").await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.notice().kind, NoticeKind::Error);
        assert_eq!(outcome.notice().message, "username taken");
    }

    #[tokio::test]
    async fn test_register_failure_without_detail_uses_fallback() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/users/")
            .with_status(400)
            .with_body(r#"{"error": "nope"}"#)
            .create_async()
            .await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));

        let outcome = session.register("bob", "hunter22").await;

        assert_eq!(outcome.notice().message, REGISTER_FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn test_register_leaves_existing_session_alone() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/users/")
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;
        let mut session = Session::new(api_for(&server), Box::new(MemoryTokenStore::with_token("tok")));

        assert!(session.register("carol", "pw123456").await.is_success());
        assert_eq!(session.token(), Some("tok"));
    }

    #[tokio::test]
    async fn test_current_user_when_anonymous() {
        let server = Server::new_async().await;
        let session = Session::new(api_for(&server), Box::new(MemoryTokenStore::new()));
        assert!(matches!(session.current_user().await, Err(ApiError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_current_user_with_token() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/users/me")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"id": 1, "username": "alice", "is_active": true}"#)
            .create_async()
            .await;
        let session = Session::new(api_for(&server), Box::new(MemoryTokenStore::with_token("tok")));

        let user = session.current_user().await.unwrap();
        assert_eq!(user.username, "alice");
    }
}

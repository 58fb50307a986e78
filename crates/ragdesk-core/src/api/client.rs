//! API client for the ragdesk account endpoints.
//!
//! Each call issues exactly one request; there are no retries. Failures are
//! returned as typed `ApiError`s so callers can tell a rejected credential
//! from an unreachable server.

use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::Config;

use super::ApiError;

/// Body returned by `POST /token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Body returned by `POST /users/` and `GET /users/me`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Body of `POST /query`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest<'a> {
    pub question: &'a str,
}

/// Answer from `POST /query` plus the passages it was grounded on.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default)]
    pub source_documents: Vec<SourceDocument>,
}

/// A retrieved passage. Older servers send bare strings instead of objects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawSource")]
pub struct SourceDocument {
    pub page_content: String,
    pub metadata: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSource {
    Text(String),
    Document {
        page_content: String,
        #[serde(default)]
        metadata: Option<Map<String, Value>>,
    },
}

impl From<RawSource> for SourceDocument {
    fn from(raw: RawSource) -> Self {
        match raw {
            RawSource::Text(page_content) => Self {
                page_content,
                metadata: Map::new(),
            },
            RawSource::Document { page_content, metadata } => Self {
                page_content,
                metadata: metadata.unwrap_or_default(),
            },
        }
    }
}

impl SourceDocument {
    /// Where the passage came from, e.g. "handbook.pdf p.3"
    pub fn origin(&self) -> Option<String> {
        let source = self.metadata.get("source").and_then(Value::as_str)?;
        match self.metadata.get("page") {
            Some(Value::Number(page)) => Some(format!("{} p.{}", source, page)),
            Some(Value::String(page)) => Some(format!("{} p.{}", source, page)),
            _ => Some(source.to_string()),
        }
    }
}

#[derive(Serialize)]
struct NewUser<'a> {
    username: &'a str,
    password: &'a str,
}

/// API client for the ragdesk server.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client from configuration
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base().to_string(),
            token: None,
        })
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange credentials for a bearer token (OAuth2 password form)
    pub async fn issue_token(&self, username: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let url = self.url("/token");
        debug!(url = %url, "Requesting access token");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "token").await
    }

    /// Create a new user account. The response body is only logged.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let url = self.url("/users/");
        debug!(url = %url, "Registering user");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&NewUser { username, password })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<UserProfile>(&text) {
            Ok(user) => debug!(id = user.id, username = %user.username, "User created"),
            Err(_) => debug!("User created"),
        }
        Ok(())
    }

    /// Fetch the profile of the user the bearer token belongs to
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::NotLoggedIn)?;
        let url = self.url("/users/me");
        debug!(url = %url, "Fetching current user");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "current user").await
    }

    /// Ask a question of the indexed documents
    pub async fn query(&self, question: &str) -> Result<QueryResponse, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::NotLoggedIn)?;
        let url = self.url("/query");
        debug!(url = %url, "Submitting question");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .json(&QueryRequest { question })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "query").await
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Request failed");
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }
}

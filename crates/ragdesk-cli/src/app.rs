//! Application shell: composes config, API client, token store and session
//! once at startup, then runs one action per invocation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use ragdesk_core::api::{QueryResponse, UserProfile};
use ragdesk_core::auth::{open_token_store, store::format_age};
use ragdesk_core::{ApiClient, ApiError, Config, Notice, Notifier, Session};
use tracing::{info, warn};

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";
pub const NOT_LOGGED_IN_MESSAGE: &str = "Not logged in.";

/// Snapshot of the session for `ragdesk status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub logged_in: bool,
    pub server: String,
    pub store: String,
    pub saved: Option<String>,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.logged_in {
            write!(f, "Logged in")?;
            if let Some(ref saved) = self.saved {
                write!(f, " (token saved {})", saved)?;
            }
        } else {
            write!(f, "Logged out")?;
        }
        write!(f, "\nServer: {}\nToken store: {}", self.server, self.store)
    }
}

pub struct App<N: Notifier> {
    config: Config,
    /// Where `last_username` is remembered; `None` keeps config in memory
    config_path: Option<PathBuf>,
    session: Session,
    notifier: N,
}

impl<N: Notifier> App<N> {
    /// Build the shell from loaded configuration
    pub fn new(config: Config, notifier: N) -> Result<Self> {
        let api = ApiClient::new(&config).context("Failed to build HTTP client")?;
        let store = open_token_store(&config)?;
        let session = Session::new(api, store);
        let config_path = Config::config_path()
            .map_err(|e| warn!(error = %e, "Config will not be saved"))
            .ok();

        Ok(Self {
            config,
            config_path,
            session,
            notifier,
        })
    }

    /// Assemble from already-built parts
    #[cfg(test)]
    pub fn from_parts(config: Config, session: Session, notifier: N) -> Self {
        Self {
            config,
            config_path: None,
            session,
            notifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[cfg(test)]
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub async fn login(&mut self, username: &str, password: &str) -> bool {
        let outcome = self.session.login(username, password).await;
        self.notifier.notify(outcome.notice());

        if outcome.is_success() {
            self.remember_username(username);
        }
        outcome.is_success()
    }

    pub async fn register(&mut self, username: &str, password: &str) -> bool {
        let outcome = self.session.register(username, password).await;
        self.notifier.notify(outcome.notice());
        outcome.is_success()
    }

    pub fn logout(&mut self) -> Result<()> {
        self.session.logout()
    }

    pub fn status(&self) -> StatusReport {
        let store = self.session.store();
        let saved = if self.session.is_logged_in() {
            store.saved_at().map(|at| format_age(at, Utc::now()))
        } else {
            None
        };

        StatusReport {
            logged_in: self.session.is_logged_in(),
            server: self.config.api_base().to_string(),
            store: store.describe(),
            saved,
        }
    }

    /// Ask the server who the token belongs to. A rejected token ends the
    /// local session.
    pub async fn whoami(&mut self) -> Option<UserProfile> {
        match self.session.current_user().await {
            Ok(user) => Some(user),
            Err(e) => {
                self.report_api_error(e);
                None
            }
        }
    }

    /// Put a question to the server's documents
    pub async fn ask(&mut self, question: &str) -> Option<QueryResponse> {
        match self.session.ask(question).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                self.report_api_error(e);
                None
            }
        }
    }

    fn report_api_error(&mut self, e: ApiError) {
        let message = match e {
            ApiError::NotLoggedIn => NOT_LOGGED_IN_MESSAGE.to_string(),
            ApiError::Unauthorized { .. } => {
                info!("Server rejected the saved token");
                if let Err(e) = self.session.logout() {
                    warn!(error = %e, "Failed to clear rejected token");
                }
                SESSION_EXPIRED_MESSAGE.to_string()
            }
            other => other.detail().map(str::to_string).unwrap_or_else(|| other.to_string()),
        };
        self.notifier.notify(&Notice::error(message));
    }

    fn remember_username(&mut self, username: &str) {
        if self.config.last_username.as_deref() == Some(username) {
            return;
        }
        self.config.last_username = Some(username.to_string());

        if let Some(ref path) = self.config_path {
            // Re-read so environment overrides never get written back
            let saved = Config::load_from(path).and_then(|mut on_disk| {
                on_disk.last_username = Some(username.to_string());
                on_disk.save_to(path)
            });
            if let Err(e) = saved {
                warn!(error = %e, "Failed to save config");
            }
        }
    }
}

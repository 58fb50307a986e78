//! Core library for ragdesk.
//!
//! Provides the pieces every front end needs to talk to a ragdesk server:
//! - `api`: REST client for the token and user endpoints
//! - `auth`: the `Session` lifecycle and pluggable token persistence
//! - `config`: on-disk configuration with environment overrides
//! - `notify`: structured, presentation-free results of session actions

pub mod api;
pub mod auth;
pub mod config;
pub mod notify;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, TokenStore};
pub use config::Config;
pub use notify::{FailureReason, Notice, NoticeKind, Notifier, Outcome};

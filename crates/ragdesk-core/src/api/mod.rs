//! REST API client module for the ragdesk server.
//!
//! This module provides the `ApiClient` for the account endpoints:
//! token issuance, user registration, the current-user lookup and
//! question answering over the indexed documents.
//!
//! The server issues JWT bearer tokens from an OAuth2 password-form
//! endpoint and reports failures as `{"detail": ...}` bodies.

pub mod client;
pub mod error;

pub use client::{ApiClient, QueryResponse, SourceDocument, TokenResponse, UserProfile};
pub use error::ApiError;

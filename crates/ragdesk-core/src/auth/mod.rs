//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `Session`: the bearer token lifecycle (login, logout, register)
//! - `TokenStore`: durable persistence for the token, with file, keychain
//!   and in-memory backends
//!
//! A token stays valid until the user logs out or the server rejects it.

pub mod keychain;
pub mod session;
pub mod store;

pub use keychain::KeyringTokenStore;
pub use session::Session;
pub use store::{open_token_store, FileTokenStore, MemoryTokenStore, TokenStore};

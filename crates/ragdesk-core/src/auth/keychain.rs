use anyhow::{Context, Result};
use keyring::Entry;

use super::store::non_blank;
use super::TokenStore;

const SERVICE_NAME: &str = "ragdesk";

/// Keychain account the token is filed under
const ACCOUNT: &str = "access_token";

/// Token kept in the OS keychain.
pub struct KeyringTokenStore {
    entry: Entry,
}

impl KeyringTokenStore {
    pub fn new() -> Result<Self> {
        let entry = Entry::new(SERVICE_NAME, ACCOUNT).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<String>> {
        match self.entry.get_password() {
            Ok(token) => Ok(non_blank(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read token from keychain"),
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        self.entry
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }

    fn describe(&self) -> String {
        format!("keychain {}/{}", SERVICE_NAME, ACCOUNT)
    }
}

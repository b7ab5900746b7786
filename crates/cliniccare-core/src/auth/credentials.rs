use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "cliniccare";

/// Storage for the refresh cookie issued at login.
///
/// A browser keeps this cookie in its jar; a native client has to keep it
/// somewhere that survives a restart for silent refresh to work.
pub trait RefreshCookieStore: Send + Sync {
    fn store(&self, value: &str) -> Result<()>;
    fn load(&self) -> Result<Option<String>>;
    fn delete(&self) -> Result<()>;
}

/// Refresh cookie in the OS keychain, one entry per API server
pub struct KeychainCookieStore {
    account: String,
}

impl KeychainCookieStore {
    pub fn new(api_url: &str) -> Self {
        Self {
            account: format!("refresh_token@{}", api_url.trim_end_matches('/')),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl RefreshCookieStore for KeychainCookieStore {
    fn store(&self, value: &str) -> Result<()> {
        self.entry()?
            .set_password(value)
            .context("Failed to store refresh cookie in keychain")?;
        Ok(())
    }

    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve refresh cookie from keychain"),
        }
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete refresh cookie from keychain"),
        }
    }
}

/// Refresh cookie kept in memory, for ephemeral sessions and tests
#[derive(Debug, Default)]
pub struct MemoryCookieStore(Mutex<Option<String>>);

impl MemoryCookieStore {
    pub fn with_value(value: &str) -> Self {
        Self(Mutex::new(Some(value.to_string())))
    }
}

impl RefreshCookieStore for MemoryCookieStore {
    fn store(&self, value: &str) -> Result<()> {
        *self.0.lock().map_err(|_| anyhow::anyhow!("cookie store poisoned"))? = Some(value.to_string());
        Ok(())
    }

    fn load(&self) -> Result<Option<String>> {
        Ok(self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("cookie store poisoned"))?
            .clone())
    }

    fn delete(&self) -> Result<()> {
        *self.0.lock().map_err(|_| anyhow::anyhow!("cookie store poisoned"))? = None;
        Ok(())
    }
}

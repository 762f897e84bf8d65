//! Bearer credential sources.
//!
//! The transport and the stream tailer ask a [`CredentialProvider`] for the
//! token before every attempt, so a token rotated in the keychain or the
//! environment is picked up on the next reconnect without restarting.
//!
//! # Providers
//!
//! - [`StaticCredentials`]: fixed token, mostly for tests and embedding
//! - [`EnvCredentials`]: read from an environment variable each time
//! - [`KeyringCredentials`]: OS keychain entry `iotaudit/api_token`
//! - [`ChainedCredentials`]: first provider that yields a token wins

use std::sync::Arc;

use async_trait::async_trait;
use keyring::Entry;
use zeroize::Zeroizing;

use crate::constants::{KEYRING_ACCOUNT, KEYRING_SERVICE};

/// Environment variable consulted by [`EnvCredentials::default`].
pub const TOKEN_ENV_VAR: &str = "IOTAUDIT_TOKEN";

/// An opaque bearer token. The backing memory is zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    /// Wrap a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// The raw token.
    pub fn token(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("Bearer {}", self.token()))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

/// Source of the bearer credential.
///
/// Returns `None` when no token is available. Callers treat that as a
/// configuration error rather than a transient fault.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch the current credential.
    async fn credential(&self) -> Option<Credential>;
}

/// Always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credential: Option<Credential>,
}

impl StaticCredentials {
    /// Provider yielding `token`. An empty token counts as missing.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            credential: (!token.is_empty()).then(|| Credential::new(token)),
        }
    }

    /// Provider that never has a credential.
    pub fn none() -> Self {
        Self { credential: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    /// Provider backed by the variable `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credential(&self) -> Option<Credential> {
        std::env::var(&self.var)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .map(Credential::new)
    }
}

/// Reads the token from the OS keychain.
///
/// Keychain calls may block on a user prompt, so they run on the blocking
/// pool.
#[derive(Debug, Clone)]
pub struct KeyringCredentials {
    service: String,
    account: String,
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }
}

impl KeyringCredentials {
    /// Provider for a specific keychain entry.
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    /// Store `token` in the keychain entry.
    pub fn store(&self, token: &str) -> anyhow::Result<()> {
        let entry = Entry::new(&self.service, &self.account)?;
        entry.set_password(token)?;
        log::info!("[credentials] Stored token in keychain ({})", self.service);
        Ok(())
    }

    fn read_blocking(service: &str, account: &str) -> Option<Credential> {
        let entry = match Entry::new(service, account) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("[credentials] Keychain unavailable: {e}");
                return None;
            }
        };
        match entry.get_password() {
            Ok(token) if !token.is_empty() => Some(Credential::new(token)),
            Ok(_) | Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                log::warn!("[credentials] Keychain read failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for KeyringCredentials {
    async fn credential(&self) -> Option<Credential> {
        let service = self.service.clone();
        let account = self.account.clone();
        match tokio::task::spawn_blocking(move || Self::read_blocking(&service, &account)).await {
            Ok(credential) => credential,
            Err(e) => {
                log::warn!("[credentials] Keychain task failed: {e}");
                None
            }
        }
    }
}

/// Tries each provider in order.
#[derive(Clone, Default)]
pub struct ChainedCredentials {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl std::fmt::Debug for ChainedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedCredentials")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl ChainedCredentials {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider.
    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Environment first, then keychain.
    pub fn standard() -> Self {
        Self::new()
            .with(EnvCredentials::default())
            .with(KeyringCredentials::default())
    }
}

#[async_trait]
impl CredentialProvider for ChainedCredentials {
    async fn credential(&self) -> Option<Credential> {
        for provider in &self.providers {
            if let Some(credential) = provider.credential().await {
                return Some(credential);
            }
        }
        None
    }
}

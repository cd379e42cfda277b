//! Provider credentials
//!
//! Secrets are only ever handed to the provider they belong to. Where they
//! are kept is chosen by `CredentialBackend`.

use crate::keyring;
use crate::provider::Provider;
use crate::store::{self, KvStore, StoreKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// The `tokens` key of the local state store
    #[default]
    Store,
    /// One entry in the OS keychain
    Keychain,
}

impl CredentialBackend {
    pub fn load(&self, kv: &dyn KvStore) -> Credentials {
        match self {
            CredentialBackend::Store => store::load_or_default(kv, StoreKey::Tokens),
            CredentialBackend::Keychain => keyring::read_credentials().unwrap_or_else(|err| {
                keyring::warn_keychain_error_once("reading API keys", &err);
                Credentials::default()
            }),
        }
    }

    pub fn save(&self, kv: &dyn KvStore, creds: &Credentials) -> anyhow::Result<()> {
        match self {
            CredentialBackend::Store => store::save_json(kv, StoreKey::Tokens, creds),
            CredentialBackend::Keychain => {
                keyring::write_credentials(creds).map_err(|e| anyhow::anyhow!(e))
            }
        }
    }
}

/// Provider → secret. Blank secrets are never stored.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    secrets: BTreeMap<Provider, String>,
}

impl Credentials {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.secrets
            .get(&provider)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn has(&self, provider: Provider) -> bool {
        self.get(provider).is_some()
    }

    /// Store a trimmed secret; an empty one removes the entry.
    pub fn set(&mut self, provider: Provider, secret: &str) {
        let secret = secret.trim();
        if secret.is_empty() {
            self.secrets.remove(&provider);
        } else {
            self.secrets.insert(provider, secret.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        Provider::all().iter().all(|p| !self.has(*p))
    }

    /// First provider in `preference` that has a key.
    pub fn first_available(&self, preference: &[Provider]) -> Option<Provider> {
        preference.iter().copied().find(|p| self.has(*p))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.secrets.keys().map(|p| p.as_str()))
            .finish()
    }
}

//! # Account Directory
//!
//! Credential lookup consulted during the challenge.
//!
//! Sessions only ever see a `(salt, verifier)` pair. How those are stored is up to the
//! [`AccountDirectory`] implementation; the crate ships [`InMemoryAccountDirectory`],
//! which the daemon seeds from its configuration file.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::config::AccountEntry;
use crate::protocol::srp::{compute_verifier, generate_salt, KEY_LENGTH};

/// Stored credential of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCredential {
    pub name: String,
    pub salt: [u8; KEY_LENGTH],
    pub verifier: [u8; KEY_LENGTH],
    pub banned: bool,
}

impl AccountCredential {
    /// Derive a credential from a clear-text password with a fresh salt
    pub fn from_password(name: &str, password: &str) -> Self {
        let salt = generate_salt();
        Self {
            name: name.to_ascii_lowercase(),
            verifier: compute_verifier(name, password, &salt),
            salt,
            banned: false,
        }
    }
}

/// Credential source queried by lower-cased account name
pub trait AccountDirectory: Send + Sync + 'static {
    fn lookup(&self, name: &str) -> Option<AccountCredential>;
}

/// Process-local account table
#[derive(Debug, Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<String, AccountCredential>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from configured accounts
    pub fn from_entries(entries: &[AccountEntry]) -> Self {
        let directory = Self::new();
        for entry in entries {
            let mut credential = AccountCredential::from_password(&entry.name, &entry.password);
            credential.banned = entry.banned;
            directory.insert(credential);
        }
        debug!(accounts = entries.len(), "Seeded account directory");
        directory
    }

    /// Insert or replace a credential
    pub fn insert(&self, mut credential: AccountCredential) {
        credential.name = credential.name.to_ascii_lowercase();
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credential.name.clone(), credential);
    }

    pub fn insert_with_password(&self, name: &str, password: &str) {
        self.insert(AccountCredential::from_password(name, password));
    }

    /// Returns false if the account does not exist
    pub fn set_banned(&self, name: &str, banned: bool) -> bool {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        match accounts.get_mut(&name.to_ascii_lowercase()) {
            Some(credential) => {
                credential.banned = banned;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, name: &str) -> Option<AccountCredential> {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.accounts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountDirectory for InMemoryAccountDirectory {
    fn lookup(&self, name: &str) -> Option<AccountCredential> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

use anyhow::{Result, anyhow};
use keyring::{Entry, Error as KeyringError};

use crate::domain::account::AccountId;

const SERVICE: &str = "rs_mail_backend";

/// Supplies the incoming-server password when the store URI carries none.
pub trait PasswordProvider: Send + Sync {
    fn password(&self, account_id: &AccountId) -> Result<Option<String>>;
}

/// Passwords kept in the OS keyring, keyed by account uuid.
pub struct KeyringPasswords;

impl PasswordProvider for KeyringPasswords {
    fn password(&self, account_id: &AccountId) -> Result<Option<String>> {
        load_password(account_id)
    }
}

/// Provider for accounts whose store URI always carries the password.
pub struct NoPasswords;

impl PasswordProvider for NoPasswords {
    fn password(&self, _account_id: &AccountId) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Save an account's incoming-server password into the OS keyring
pub fn save_password(account_id: &AccountId, password: &str) -> Result<()> {
    let entry = Entry::new(SERVICE, account_id.as_str());
    entry?
        .set_password(password)
        .map_err(|e| anyhow!(e.to_string()))?;
    Ok(())
}

/// Load an account's password from the keyring
pub fn load_password(account_id: &AccountId) -> Result<Option<String>> {
    let entry = Entry::new(SERVICE, account_id.as_str());
    match entry?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

/// Remove an account's password; a missing entry is not an error
pub fn delete_password(account_id: &AccountId) -> Result<()> {
    let entry = Entry::new(SERVICE, account_id.as_str());
    match entry?.delete_credential() {
        Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

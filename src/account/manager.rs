use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::account::{Account, AccountId};

/// Notified after an account has been removed from the [`AccountManager`].
pub trait AccountRemovedListener: Send + Sync {
    fn on_account_removed(&self, account_id: &AccountId);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Owns the account list and fans out removal events.
pub struct AccountManager {
    path: Option<PathBuf>,
    accounts: Mutex<Vec<Account>>,
    removed_listeners: Mutex<Vec<Arc<dyn AccountRemovedListener>>>,
}

impl AccountManager {
    /// Accounts kept only in memory.
    pub fn in_memory(accounts: Vec<Account>) -> Self {
        Self {
            path: None,
            accounts: Mutex::new(accounts),
            removed_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Loads `accounts.toml`, starting empty if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let s = fs::read_to_string(path)?;
            toml::from_str::<AccountsFile>(&s)?
        } else {
            AccountsFile::default()
        };
        debug!("loaded {} account(s) from {}", file.accounts.len(), path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            accounts: Mutex::new(file.accounts),
            removed_listeners: Mutex::new(Vec::new()),
        })
    }

    fn accounts_guard(&self) -> MutexGuard<'_, Vec<Account>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners_guard(&self) -> MutexGuard<'_, Vec<Arc<dyn AccountRemovedListener>>> {
        self.removed_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, accounts: &[Account]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = AccountsFile {
            accounts: accounts.to_vec(),
        };
        fs::write(path, toml::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts_guard().clone()
    }

    pub fn get_account(&self, account_id: &AccountId) -> Option<Account> {
        self.accounts_guard()
            .iter()
            .find(|a| &a.uuid == account_id)
            .cloned()
    }

    /// Inserts the account or replaces the one with the same uuid.
    pub fn save(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts_guard();
        match accounts.iter_mut().find(|a| a.uuid == account.uuid) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }
        self.persist(&accounts)
    }

    /// Removes the account and then notifies every removal listener.
    pub fn delete(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let removed = {
            let mut accounts = self.accounts_guard();
            let Some(pos) = accounts.iter().position(|a| &a.uuid == account_id) else {
                return Ok(None);
            };
            let removed = accounts.remove(pos);
            self.persist(&accounts)?;
            removed
        };
        info!("removed account {account_id}");

        let listeners = self.listeners_guard().clone();
        for listener in listeners {
            listener.on_account_removed(account_id);
        }
        Ok(Some(removed))
    }

    pub fn add_account_removed_listener(&self, listener: Arc<dyn AccountRemovedListener>) {
        self.listeners_guard().push(listener);
    }

    pub fn remove_account_removed_listener(&self, listener: &Arc<dyn AccountRemovedListener>) {
        self.listeners_guard()
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Recorder(Mutex<Vec<AccountId>>);

    impl AccountRemovedListener for Recorder {
        fn on_account_removed(&self, account_id: &AccountId) {
            self.0.lock().unwrap().push(account_id.clone());
        }
    }

    #[test]
    fn save_and_reload_from_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("accounts.toml");

        let mut account = Account::with_uuid("a1".into(), "me@example.org", "imap://me:pw@host/");
        account.sent_folder = Some("Sent".to_string());
        {
            let manager = AccountManager::load(&path)?;
            manager.save(account.clone())?;
        }

        let manager = AccountManager::load(&path)?;
        assert_eq!(manager.accounts(), vec![account]);
        Ok(())
    }

    #[test]
    fn save_replaces_existing_uuid() -> Result<()> {
        let manager = AccountManager::in_memory(vec![]);
        let mut account = Account::with_uuid("a1".into(), "me@example.org", "imap://host/");
        manager.save(account.clone())?;
        account.store_uri = "pop3://host/".to_string();
        manager.save(account.clone())?;

        assert_eq!(manager.accounts().len(), 1);
        assert_eq!(
            manager.get_account(&"a1".into()).map(|a| a.store_uri),
            Some("pop3://host/".to_string())
        );
        Ok(())
    }

    #[test]
    fn delete_notifies_listeners_once() -> Result<()> {
        let account = Account::with_uuid("a1".into(), "me@example.org", "imap://host/");
        let manager = AccountManager::in_memory(vec![account]);
        let recorder = Arc::new(Recorder(Mutex::new(vec![])));
        manager.add_account_removed_listener(recorder.clone());

        assert!(manager.delete(&"a1".into())?.is_some());
        assert!(manager.delete(&"a1".into())?.is_none());

        assert_eq!(*recorder.0.lock().unwrap(), vec![AccountId::from("a1")]);
        Ok(())
    }
}

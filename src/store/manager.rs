use anyhow::Result;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::account::{AccountManager, AccountRemovedListener};
use crate::cache::InstanceCache;
use crate::domain::account::{Account, AccountId};
use crate::store::listenable::ListenableMessageStore;
use crate::store::sqlite::SqliteMessageStore;

pub trait MessageStoreFactory: Send + Sync {
    fn create(&self, account: &Account) -> Result<ListenableMessageStore>;
}

/// One SQLite database per account under `data_dir`.
pub struct SqliteMessageStoreFactory {
    data_dir: PathBuf,
}

impl SqliteMessageStoreFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn database_path(&self, account_id: &AccountId) -> PathBuf {
        self.data_dir.join(format!("{account_id}.db"))
    }
}

impl MessageStoreFactory for SqliteMessageStoreFactory {
    fn create(&self, account: &Account) -> Result<ListenableMessageStore> {
        fs::create_dir_all(&self.data_dir)?;
        let path = self.database_path(&account.uuid);
        debug!("opening message store {}", path.display());
        let store =
            SqliteMessageStore::open(&path)?.with_default_visible_limit(account.display_count);
        Ok(ListenableMessageStore::new(Box::new(store)))
    }
}

/// Stores that live only as long as the process.
pub struct InMemoryMessageStoreFactory;

impl MessageStoreFactory for InMemoryMessageStoreFactory {
    fn create(&self, account: &Account) -> Result<ListenableMessageStore> {
        let store =
            SqliteMessageStore::open_in_memory()?.with_default_visible_limit(account.display_count);
        Ok(ListenableMessageStore::new(Box::new(store)))
    }
}

/// Hands out one [`ListenableMessageStore`] per account.
pub struct MessageStoreManager {
    factory: Arc<dyn MessageStoreFactory>,
    stores: InstanceCache<AccountId, Arc<ListenableMessageStore>>,
}

impl MessageStoreManager {
    /// Creates the manager and subscribes it to account removals.
    pub fn new(
        account_manager: &AccountManager,
        factory: Arc<dyn MessageStoreFactory>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            factory,
            stores: InstanceCache::new(),
        });
        account_manager.add_account_removed_listener(manager.clone());
        manager
    }

    pub fn get_message_store(&self, account: &Account) -> Result<Arc<ListenableMessageStore>> {
        self.stores.get_or_try_insert_with(&account.uuid, || {
            info!("creating message store for account {}", account.uuid);
            self.factory.create(account).map(Arc::new)
        })
    }
}

impl AccountRemovedListener for MessageStoreManager {
    fn on_account_removed(&self, account_id: &AccountId) {
        if self.stores.remove(account_id) {
            debug!("evicted message store for account {account_id}");
        }
    }
}

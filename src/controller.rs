use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use crate::account::AccountManager;
use crate::backend::{BackendManager, BackendResult, SyncConfig, SyncListener};
use crate::domain::account::{Account, AccountId};
use crate::domain::folder::Folder;
use crate::store::{FolderRepository, MessageStoreManager};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AccountSyncReport {
    pub folders_synced: usize,
    pub folders_failed: usize,
    pub new_messages: usize,
}

/// Counts events across the folders of one account sync.
#[derive(Default)]
struct ReportListener {
    new_messages: usize,
}

impl SyncListener for ReportListener {
    fn sync_new_message(&mut self, _folder_server_id: &str, _message_server_id: &str) {
        self.new_messages += 1;
    }
}

pub struct MessagingController {
    account_manager: Arc<AccountManager>,
    backend_manager: Arc<BackendManager>,
    message_store_manager: Arc<MessageStoreManager>,
    sync_config: SyncConfig,
}

impl MessagingController {
    pub fn new(
        account_manager: Arc<AccountManager>,
        backend_manager: Arc<BackendManager>,
        message_store_manager: Arc<MessageStoreManager>,
        sync_config: SyncConfig,
    ) -> Self {
        account_manager.add_account_removed_listener(backend_manager.clone());
        Self {
            account_manager,
            backend_manager,
            message_store_manager,
            sync_config,
        }
    }

    pub fn account_manager(&self) -> &AccountManager {
        &self.account_manager
    }

    pub fn refresh_folder_list(&self, account: &Account) -> BackendResult<()> {
        self.backend_manager
            .get_backend(account)?
            .refresh_folder_list()
    }

    pub fn synchronize_mailbox(
        &self,
        account: &Account,
        folder_server_id: &str,
        listener: &mut dyn SyncListener,
    ) -> BackendResult<()> {
        self.backend_manager
            .get_backend(account)?
            .sync(folder_server_id, &self.sync_config, listener)
    }

    pub fn remote_folders(&self, account: &Account) -> Result<Vec<Folder>> {
        FolderRepository::new(self.message_store_manager.clone(), account.clone()).get_remote_folders()
    }

    /// Refreshes the folder list, then syncs every remote folder.
    ///
    /// A failing folder is logged and counted; the others still sync.
    pub fn sync_account(&self, account: &Account) -> Result<AccountSyncReport> {
        self.refresh_folder_list(account)?;

        let mut report = AccountSyncReport::default();
        let mut listener = ReportListener::default();
        for folder in self.remote_folders(account)? {
            match self.synchronize_mailbox(account, &folder.server_id, &mut listener) {
                Ok(()) => report.folders_synced += 1,
                Err(e) => {
                    warn!("account {}: folder {} failed: {e}", account.uuid, folder.server_id);
                    report.folders_failed += 1;
                }
            }
        }
        report.new_messages = listener.new_messages;

        info!(
            "account {}: {} folder(s) synced, {} failed, {} new message(s)",
            account.uuid, report.folders_synced, report.folders_failed, report.new_messages
        );
        Ok(report)
    }

    /// Removes the account; the removal fan-out evicts its backend and
    /// message store.
    pub fn delete_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.account_manager.delete(account_id)
    }
}

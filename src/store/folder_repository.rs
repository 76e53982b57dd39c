use anyhow::Result;
use std::sync::Arc;

use crate::domain::account::Account;
use crate::domain::folder::{Folder, FolderDetails, FolderId, FolderType};
use crate::store::manager::MessageStoreManager;
use crate::store::repo::MessageStore;

/// Derives a folder's type from the account's special-folder settings.
///
/// Exact match on the server id; the first configured role that matches wins.
pub fn folder_type_of(account: &Account, server_id: &str) -> FolderType {
    let roles = [
        (&account.inbox_folder, FolderType::Inbox),
        (&account.sent_folder, FolderType::Sent),
        (&account.trash_folder, FolderType::Trash),
        (&account.drafts_folder, FolderType::Drafts),
        (&account.archive_folder, FolderType::Archive),
        (&account.spam_folder, FolderType::Spam),
    ];
    roles
        .into_iter()
        .find(|(configured, _)| configured.as_deref() == Some(server_id))
        .map(|(_, folder_type)| folder_type)
        .unwrap_or(FolderType::Regular)
}

pub struct FolderRepository {
    message_store_manager: Arc<MessageStoreManager>,
    account: Account,
}

impl FolderRepository {
    pub fn new(message_store_manager: Arc<MessageStoreManager>, account: Account) -> Self {
        Self {
            message_store_manager,
            account,
        }
    }

    fn is_remote(&self, details: &FolderDetails) -> bool {
        !details.local_only && details.server_id != self.account.outbox_folder
    }

    fn to_folder(&self, details: FolderDetails) -> Folder {
        Folder {
            folder_type: folder_type_of(&self.account, &details.server_id),
            id: details.id,
            server_id: details.server_id,
            name: details.name,
        }
    }

    /// Every folder that mirrors a server folder; the outbox is excluded.
    pub fn get_remote_folders(&self) -> Result<Vec<Folder>> {
        let store = self.message_store_manager.get_message_store(&self.account)?;
        let folders = store
            .get_folders()?
            .into_iter()
            .filter(|f| self.is_remote(f))
            .map(|f| self.to_folder(f))
            .collect();
        Ok(folders)
    }

    pub fn get_folder(&self, folder_id: FolderId) -> Result<Option<Folder>> {
        let store = self.message_store_manager.get_message_store(&self.account)?;
        Ok(store.get_folder(folder_id)?.map(|f| self.to_folder(f)))
    }

    pub fn get_folder_server_id(&self, folder_id: FolderId) -> Result<Option<String>> {
        let store = self.message_store_manager.get_message_store(&self.account)?;
        Ok(store.get_folder(folder_id)?.map(|f| f.server_id))
    }
}

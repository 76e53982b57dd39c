//! Adapts an account's local message store to the [`BackendStorage`] contract
//! protocol backends write through during sync.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::storage::{BackendFolder, BackendStorage};
use crate::domain::account::Account;
use crate::domain::email::{Flag, Flags, MessageData, MessageDownloadState, MessageServerId};
use crate::domain::folder::{FolderId, FolderInfo, FolderType, MoreMessages};
use crate::store::listenable::ListenableMessageStore;
use crate::store::manager::MessageStoreManager;
use crate::store::repo::MessageStore;

pub struct LocalBackendStorage {
    store: Arc<ListenableMessageStore>,
}

impl LocalBackendStorage {
    pub fn new(store: Arc<ListenableMessageStore>) -> Self {
        Self { store }
    }
}

impl BackendStorage for LocalBackendStorage {
    fn get_folder(&self, folder_server_id: &str) -> Result<Box<dyn BackendFolder>> {
        Ok(Box::new(LocalBackendFolder::new(
            self.store.clone(),
            folder_server_id,
        )?))
    }

    fn get_folder_server_ids(&self) -> Result<Vec<String>> {
        self.store.get_remote_folder_server_ids()
    }

    fn create_folders(&self, folders: &[FolderInfo]) -> Result<()> {
        if folders.is_empty() {
            return Ok(());
        }
        self.store.create_folders(folders)
    }

    fn delete_folders(&self, folder_server_ids: &[String]) -> Result<()> {
        if folder_server_ids.is_empty() {
            return Ok(());
        }
        self.store.delete_folders(folder_server_ids)
    }

    fn change_folder(
        &self,
        folder_server_id: &str,
        name: &str,
        folder_type: FolderType,
    ) -> Result<()> {
        self.store.change_folder(folder_server_id, name, folder_type)
    }

    fn get_extra_string(&self, name: &str) -> Result<Option<String>> {
        self.store.get_extra_string(name)
    }

    fn set_extra_string(&self, name: &str, value: &str) -> Result<()> {
        self.store.set_extra_string(name, value)
    }

    fn get_extra_number(&self, name: &str) -> Result<Option<i64>> {
        self.store.get_extra_number(name)
    }

    fn set_extra_number(&self, name: &str, value: i64) -> Result<()> {
        self.store.set_extra_number(name, value)
    }
}

pub struct LocalBackendFolder {
    store: Arc<ListenableMessageStore>,
    server_id: String,
    folder_id: FolderId,
    name: String,
    visible_limit: u32,
}

impl LocalBackendFolder {
    pub fn new(store: Arc<ListenableMessageStore>, folder_server_id: &str) -> Result<Self> {
        let details = store
            .get_folder_by_server_id(folder_server_id)?
            .ok_or_else(|| anyhow!("couldn't find folder {folder_server_id}"))?;
        Ok(Self {
            store,
            server_id: details.server_id,
            folder_id: details.id,
            name: details.name,
            visible_limit: details.visible_limit,
        })
    }
}

impl BackendFolder for LocalBackendFolder {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn visible_limit(&self) -> u32 {
        self.visible_limit
    }

    fn get_message_server_ids(&self) -> Result<Vec<MessageServerId>> {
        self.store.get_message_server_ids(self.folder_id)
    }

    fn get_all_messages_and_effective_dates(&self) -> Result<HashMap<MessageServerId, Option<i64>>> {
        self.store.get_all_messages_and_dates(self.folder_id)
    }

    fn destroy_messages(&self, message_server_ids: &[MessageServerId]) -> Result<()> {
        self.store.destroy_messages(self.folder_id, message_server_ids)
    }

    fn clear_all_messages(&self) -> Result<()> {
        self.store.clear_all_messages(self.folder_id)
    }

    fn get_more_messages(&self) -> Result<MoreMessages> {
        self.store.get_more_messages(self.folder_id)
    }

    fn set_more_messages(&self, more_messages: MoreMessages) -> Result<()> {
        self.store.set_more_messages(self.folder_id, more_messages)
    }

    fn set_last_checked(&self, timestamp: i64) -> Result<()> {
        self.store.set_last_checked(self.folder_id, timestamp)
    }

    fn set_status(&self, status: Option<&str>) -> Result<()> {
        self.store.set_status(self.folder_id, status)
    }

    fn is_message_present(&self, message_server_id: &str) -> Result<bool> {
        self.store.is_message_present(self.folder_id, message_server_id)
    }

    fn get_message_flags(&self, message_server_id: &str) -> Result<Flags> {
        self.store.get_message_flags(self.folder_id, message_server_id)
    }

    fn set_message_flag(&self, message_server_id: &str, flag: Flag, value: bool) -> Result<()> {
        self.store
            .set_message_flag(self.folder_id, message_server_id, flag, value)
    }

    fn save_message(&self, message: &MessageData, state: MessageDownloadState) -> Result<()> {
        self.store.save_message(self.folder_id, message, state)
    }

    fn get_oldest_message_date(&self) -> Result<Option<i64>> {
        self.store.get_oldest_message_date(self.folder_id)
    }

    fn get_last_uid(&self) -> Result<Option<i64>> {
        self.store.get_last_uid(self.folder_id)
    }

    fn get_push_state(&self) -> Result<Option<String>> {
        self.store.get_push_state(self.folder_id)
    }

    fn set_push_state(&self, push_state: Option<&str>) -> Result<()> {
        self.store.set_push_state(self.folder_id, push_state)
    }

    fn get_unread_message_count(&self) -> Result<u32> {
        self.store.get_unread_message_count(self.folder_id)
    }

    fn get_folder_extra_string(&self, name: &str) -> Result<Option<String>> {
        self.store.get_folder_extra_string(self.folder_id, name)
    }

    fn set_folder_extra_string(&self, name: &str, value: Option<&str>) -> Result<()> {
        self.store.set_folder_extra_string(self.folder_id, name, value)
    }

    fn get_folder_extra_number(&self, name: &str) -> Result<Option<i64>> {
        self.store.get_folder_extra_number(self.folder_id, name)
    }

    fn set_folder_extra_number(&self, name: &str, value: i64) -> Result<()> {
        self.store.set_folder_extra_number(self.folder_id, name, value)
    }
}

/// Builds the storage adapter a backend factory wires into a new backend.
pub struct BackendStorageFactory {
    message_store_manager: Arc<MessageStoreManager>,
}

impl BackendStorageFactory {
    pub fn new(message_store_manager: Arc<MessageStoreManager>) -> Self {
        Self {
            message_store_manager,
        }
    }

    pub fn create_backend_storage(&self, account: &Account) -> Result<Arc<LocalBackendStorage>> {
        let store = self.message_store_manager.get_message_store(account)?;
        Ok(Arc::new(LocalBackendStorage::new(store)))
    }
}

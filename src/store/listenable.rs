use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::email::{Flag, Flags, MessageData, MessageDownloadState, MessageServerId};
use crate::domain::folder::{FolderDetails, FolderId, FolderInfo, FolderType, MoreMessages};
use crate::store::repo::{MessageStore, StoredMessage};

/// Receives change notifications from a [`ListenableMessageStore`].
pub trait MessageStoreListener: Send + Sync {
    /// Folders were created, deleted, renamed or had their settings changed.
    fn on_folders_changed(&self) {}
    fn on_messages_changed(&self, _folder_id: FolderId) {}
}

/// Wraps a [`MessageStore`] and notifies listeners after every mutation.
pub struct ListenableMessageStore {
    store: Box<dyn MessageStore>,
    listeners: Mutex<Vec<Arc<dyn MessageStoreListener>>>,
}

impl ListenableMessageStore {
    pub fn new(store: Box<dyn MessageStore>) -> Self {
        Self {
            store,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn MessageStoreListener>) {
        self.listeners().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MessageStoreListener>) {
        self.listeners()
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn MessageStoreListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Listeners run outside the lock so they may register or remove listeners.
    fn snapshot(&self) -> Vec<Arc<dyn MessageStoreListener>> {
        self.listeners().clone()
    }

    fn notify_folders_changed(&self) {
        for listener in self.snapshot() {
            listener.on_folders_changed();
        }
    }

    fn notify_messages_changed(&self, folder_id: FolderId) {
        for listener in self.snapshot() {
            listener.on_messages_changed(folder_id);
        }
    }
}

impl MessageStore for ListenableMessageStore {
    fn create_folders(&self, folders: &[FolderInfo]) -> Result<()> {
        self.store.create_folders(folders)?;
        self.notify_folders_changed();
        Ok(())
    }

    fn create_local_folder(&self, server_id: &str, name: &str) -> Result<FolderId> {
        let id = self.store.create_local_folder(server_id, name)?;
        self.notify_folders_changed();
        Ok(id)
    }

    fn get_folders(&self) -> Result<Vec<FolderDetails>> {
        self.store.get_folders()
    }

    fn get_folder(&self, folder_id: FolderId) -> Result<Option<FolderDetails>> {
        self.store.get_folder(folder_id)
    }

    fn get_folder_by_server_id(&self, server_id: &str) -> Result<Option<FolderDetails>> {
        self.store.get_folder_by_server_id(server_id)
    }

    fn get_remote_folder_server_ids(&self) -> Result<Vec<String>> {
        self.store.get_remote_folder_server_ids()
    }

    fn change_folder(&self, server_id: &str, name: &str, folder_type: FolderType) -> Result<()> {
        self.store.change_folder(server_id, name, folder_type)?;
        self.notify_folders_changed();
        Ok(())
    }

    fn delete_folders(&self, server_ids: &[String]) -> Result<()> {
        self.store.delete_folders(server_ids)?;
        self.notify_folders_changed();
        Ok(())
    }

    fn set_visible_limit(&self, folder_id: FolderId, visible_limit: u32) -> Result<()> {
        self.store.set_visible_limit(folder_id, visible_limit)?;
        self.notify_folders_changed();
        Ok(())
    }

    fn get_more_messages(&self, folder_id: FolderId) -> Result<MoreMessages> {
        self.store.get_more_messages(folder_id)
    }

    fn set_more_messages(&self, folder_id: FolderId, more_messages: MoreMessages) -> Result<()> {
        self.store.set_more_messages(folder_id, more_messages)
    }

    fn set_last_checked(&self, folder_id: FolderId, timestamp: i64) -> Result<()> {
        self.store.set_last_checked(folder_id, timestamp)
    }

    fn set_status(&self, folder_id: FolderId, status: Option<&str>) -> Result<()> {
        self.store.set_status(folder_id, status)
    }

    fn get_push_state(&self, folder_id: FolderId) -> Result<Option<String>> {
        self.store.get_push_state(folder_id)
    }

    fn set_push_state(&self, folder_id: FolderId, push_state: Option<&str>) -> Result<()> {
        self.store.set_push_state(folder_id, push_state)
    }

    fn get_folder_extra_string(&self, folder_id: FolderId, name: &str) -> Result<Option<String>> {
        self.store.get_folder_extra_string(folder_id, name)
    }

    fn set_folder_extra_string(
        &self,
        folder_id: FolderId,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.store.set_folder_extra_string(folder_id, name, value)
    }

    fn get_folder_extra_number(&self, folder_id: FolderId, name: &str) -> Result<Option<i64>> {
        self.store.get_folder_extra_number(folder_id, name)
    }

    fn set_folder_extra_number(&self, folder_id: FolderId, name: &str, value: i64) -> Result<()> {
        self.store.set_folder_extra_number(folder_id, name, value)
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

    fn get_message_server_ids(&self, folder_id: FolderId) -> Result<Vec<MessageServerId>> {
        self.store.get_message_server_ids(folder_id)
    }

    fn get_all_messages_and_dates(
        &self,
        folder_id: FolderId,
    ) -> Result<HashMap<MessageServerId, Option<i64>>> {
        self.store.get_all_messages_and_dates(folder_id)
    }

    fn get_messages(&self, folder_id: FolderId) -> Result<Vec<StoredMessage>> {
        self.store.get_messages(folder_id)
    }

    fn destroy_messages(&self, folder_id: FolderId, server_ids: &[MessageServerId]) -> Result<()> {
        self.store.destroy_messages(folder_id, server_ids)?;
        self.notify_messages_changed(folder_id);
        Ok(())
    }

    fn clear_all_messages(&self, folder_id: FolderId) -> Result<()> {
        self.store.clear_all_messages(folder_id)?;
        self.notify_messages_changed(folder_id);
        Ok(())
    }

    fn is_message_present(&self, folder_id: FolderId, server_id: &str) -> Result<bool> {
        self.store.is_message_present(folder_id, server_id)
    }

    fn get_message_flags(&self, folder_id: FolderId, server_id: &str) -> Result<Flags> {
        self.store.get_message_flags(folder_id, server_id)
    }

    fn set_message_flag(
        &self,
        folder_id: FolderId,
        server_id: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        self.store.set_message_flag(folder_id, server_id, flag, value)?;
        self.notify_messages_changed(folder_id);
        Ok(())
    }

    fn save_message(
        &self,
        folder_id: FolderId,
        message: &MessageData,
        state: MessageDownloadState,
    ) -> Result<()> {
        self.store.save_message(folder_id, message, state)?;
        self.notify_messages_changed(folder_id);
        Ok(())
    }

    fn get_oldest_message_date(&self, folder_id: FolderId) -> Result<Option<i64>> {
        self.store.get_oldest_message_date(folder_id)
    }

    fn get_last_uid(&self, folder_id: FolderId) -> Result<Option<i64>> {
        self.store.get_last_uid(folder_id)
    }

    fn get_unread_message_count(&self, folder_id: FolderId) -> Result<u32> {
        self.store.get_unread_message_count(folder_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteMessageStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        folders: AtomicUsize,
        messages: AtomicUsize,
    }

    impl MessageStoreListener for CountingListener {
        fn on_folders_changed(&self) {
            self.folders.fetch_add(1, Ordering::SeqCst);
        }

        fn on_messages_changed(&self, _folder_id: FolderId) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn notifies_listeners_until_removed() -> Result<()> {
        let store = ListenableMessageStore::new(Box::new(SqliteMessageStore::open_in_memory()?));
        let counting = Arc::new(CountingListener::default());
        let listener: Arc<dyn MessageStoreListener> = counting.clone();
        store.add_listener(listener.clone());

        store.create_folders(&[FolderInfo::new("INBOX", "Inbox", FolderType::Inbox)])?;
        let inbox = store.get_folder_by_server_id("INBOX")?.map(|f| f.id).unwrap_or_default();
        store.set_visible_limit(inbox, 10)?;
        store.set_status(inbox, Some("ok"))?;
        store.clear_all_messages(inbox)?;

        assert_eq!(counting.folders.load(Ordering::SeqCst), 2);
        assert_eq!(counting.messages.load(Ordering::SeqCst), 1);

        store.remove_listener(&listener);
        store.delete_folders(&["INBOX".to_string()])?;
        assert_eq!(counting.folders.load(Ordering::SeqCst), 2);
        Ok(())
    }
}

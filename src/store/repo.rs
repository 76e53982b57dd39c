use anyhow::Result;
use std::collections::HashMap;

use crate::domain::email::{Flag, Flags, MessageData, MessageDownloadState, MessageServerId};
use crate::domain::folder::{FolderDetails, FolderId, FolderInfo, FolderType, MoreMessages};

/// A message row as kept locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub server_id: MessageServerId,
    pub subject: String,
    pub sender: String,
    pub date_epoch: Option<i64>,
    pub flags: Flags,
    pub preview: String,
    pub download_state: MessageDownloadState,
}

/// The on-device store of one account's folders and messages.
pub trait MessageStore: Send + Sync {
    fn create_folders(&self, folders: &[FolderInfo]) -> Result<()>;
    /// Creates a folder that never exists on the server (the outbox).
    fn create_local_folder(&self, server_id: &str, name: &str) -> Result<FolderId>;
    fn get_folders(&self) -> Result<Vec<FolderDetails>>;
    fn get_folder(&self, folder_id: FolderId) -> Result<Option<FolderDetails>>;
    fn get_folder_by_server_id(&self, server_id: &str) -> Result<Option<FolderDetails>>;
    fn get_remote_folder_server_ids(&self) -> Result<Vec<String>>;
    fn change_folder(&self, server_id: &str, name: &str, folder_type: FolderType) -> Result<()>;
    fn delete_folders(&self, server_ids: &[String]) -> Result<()>;
    fn set_visible_limit(&self, folder_id: FolderId, visible_limit: u32) -> Result<()>;

    fn get_more_messages(&self, folder_id: FolderId) -> Result<MoreMessages>;
    fn set_more_messages(&self, folder_id: FolderId, more_messages: MoreMessages) -> Result<()>;
    fn set_last_checked(&self, folder_id: FolderId, timestamp: i64) -> Result<()>;
    fn set_status(&self, folder_id: FolderId, status: Option<&str>) -> Result<()>;
    fn get_push_state(&self, folder_id: FolderId) -> Result<Option<String>>;
    fn set_push_state(&self, folder_id: FolderId, push_state: Option<&str>) -> Result<()>;

    fn get_folder_extra_string(&self, folder_id: FolderId, name: &str) -> Result<Option<String>>;
    fn set_folder_extra_string(&self, folder_id: FolderId, name: &str, value: Option<&str>)
    -> Result<()>;
    fn get_folder_extra_number(&self, folder_id: FolderId, name: &str) -> Result<Option<i64>>;
    fn set_folder_extra_number(&self, folder_id: FolderId, name: &str, value: i64) -> Result<()>;

    fn get_extra_string(&self, name: &str) -> Result<Option<String>>;
    fn set_extra_string(&self, name: &str, value: &str) -> Result<()>;
    fn get_extra_number(&self, name: &str) -> Result<Option<i64>>;
    fn set_extra_number(&self, name: &str, value: i64) -> Result<()>;

    fn get_message_server_ids(&self, folder_id: FolderId) -> Result<Vec<MessageServerId>>;
    fn get_all_messages_and_dates(
        &self,
        folder_id: FolderId,
    ) -> Result<HashMap<MessageServerId, Option<i64>>>;
    fn get_messages(&self, folder_id: FolderId) -> Result<Vec<StoredMessage>>;
    fn destroy_messages(&self, folder_id: FolderId, server_ids: &[MessageServerId]) -> Result<()>;
    fn clear_all_messages(&self, folder_id: FolderId) -> Result<()>;
    fn is_message_present(&self, folder_id: FolderId, server_id: &str) -> Result<bool>;
    fn get_message_flags(&self, folder_id: FolderId, server_id: &str) -> Result<Flags>;
    fn set_message_flag(
        &self,
        folder_id: FolderId,
        server_id: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()>;
    fn save_message(
        &self,
        folder_id: FolderId,
        message: &MessageData,
        state: MessageDownloadState,
    ) -> Result<()>;

    fn get_oldest_message_date(&self, folder_id: FolderId) -> Result<Option<i64>>;
    fn get_last_uid(&self, folder_id: FolderId) -> Result<Option<i64>>;
    fn get_unread_message_count(&self, folder_id: FolderId) -> Result<u32>;
}

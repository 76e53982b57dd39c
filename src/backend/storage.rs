use anyhow::Result;
use std::collections::HashMap;

use crate::domain::email::{Flag, Flags, MessageData, MessageDownloadState, MessageServerId};
use crate::domain::folder::{FolderInfo, FolderType, MoreMessages};

/// Local storage as seen by a protocol backend during sync.
pub trait BackendStorage: Send + Sync {
    /// Fails if no folder with this server id exists locally.
    fn get_folder(&self, folder_server_id: &str) -> Result<Box<dyn BackendFolder>>;

    /// Server ids of all folders that mirror a remote folder.
    fn get_folder_server_ids(&self) -> Result<Vec<String>>;

    fn create_folders(&self, folders: &[FolderInfo]) -> Result<()>;
    fn delete_folders(&self, folder_server_ids: &[String]) -> Result<()>;
    fn change_folder(&self, folder_server_id: &str, name: &str, folder_type: FolderType)
    -> Result<()>;

    fn get_extra_string(&self, name: &str) -> Result<Option<String>>;
    fn set_extra_string(&self, name: &str, value: &str) -> Result<()>;
    fn get_extra_number(&self, name: &str) -> Result<Option<i64>>;
    fn set_extra_number(&self, name: &str, value: i64) -> Result<()>;
}

/// Per-folder read/write access used by the sync algorithms.
pub trait BackendFolder {
    fn server_id(&self) -> &str;
    fn name(&self) -> &str;
    fn visible_limit(&self) -> u32;

    fn get_message_server_ids(&self) -> Result<Vec<MessageServerId>>;
    /// Message server id to message date, for messages not marked deleted.
    fn get_all_messages_and_effective_dates(&self) -> Result<HashMap<MessageServerId, Option<i64>>>;
    fn destroy_messages(&self, message_server_ids: &[MessageServerId]) -> Result<()>;
    fn clear_all_messages(&self) -> Result<()>;

    fn get_more_messages(&self) -> Result<MoreMessages>;
    fn set_more_messages(&self, more_messages: MoreMessages) -> Result<()>;
    fn set_last_checked(&self, timestamp: i64) -> Result<()>;
    fn set_status(&self, status: Option<&str>) -> Result<()>;

    fn is_message_present(&self, message_server_id: &str) -> Result<bool>;
    fn get_message_flags(&self, message_server_id: &str) -> Result<Flags>;
    fn set_message_flag(&self, message_server_id: &str, flag: Flag, value: bool) -> Result<()>;
    fn save_message(&self, message: &MessageData, state: MessageDownloadState) -> Result<()>;

    fn get_oldest_message_date(&self) -> Result<Option<i64>>;
    fn get_last_uid(&self) -> Result<Option<i64>>;
    fn get_push_state(&self) -> Result<Option<String>>;
    fn set_push_state(&self, push_state: Option<&str>) -> Result<()>;
    fn get_unread_message_count(&self) -> Result<u32>;

    fn get_folder_extra_string(&self, name: &str) -> Result<Option<String>>;
    fn set_folder_extra_string(&self, name: &str, value: Option<&str>) -> Result<()>;
    fn get_folder_extra_number(&self, name: &str) -> Result<Option<i64>>;
    fn set_folder_extra_number(&self, name: &str, value: i64) -> Result<()>;
}

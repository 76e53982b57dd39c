use std::fmt;

/// Local database id of a folder.
pub type FolderId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderType {
    Inbox,
    Sent,
    Trash,
    Drafts,
    Archive,
    Spam,
    Regular,
}

impl FolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderType::Inbox => "inbox",
            FolderType::Sent => "sent",
            FolderType::Trash => "trash",
            FolderType::Drafts => "drafts",
            FolderType::Archive => "archive",
            FolderType::Spam => "spam",
            FolderType::Regular => "regular",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "inbox" => FolderType::Inbox,
            "sent" => FolderType::Sent,
            "trash" => FolderType::Trash,
            "drafts" => FolderType::Drafts,
            "archive" => FolderType::Archive,
            "spam" => FolderType::Spam,
            _ => FolderType::Regular,
        }
    }
}

impl fmt::Display for FolderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: FolderId,
    pub server_id: String,
    pub name: String,
    pub folder_type: FolderType,
}

/// Folder record as kept by the message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderDetails {
    pub id: FolderId,
    pub server_id: String,
    pub name: String,
    /// Type reported by the server when the folder was created.
    pub server_type: FolderType,
    pub local_only: bool,
    pub visible_limit: u32,
    pub last_checked: Option<i64>,
    pub status: Option<String>,
}

/// Folder description used when a backend creates or renames folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub server_id: String,
    pub name: String,
    pub folder_type: FolderType,
}

impl FolderInfo {
    pub fn new(server_id: impl Into<String>, name: impl Into<String>, folder_type: FolderType) -> Self {
        Self {
            server_id: server_id.into(),
            name: name.into(),
            folder_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreMessages {
    Unknown,
    True,
    False,
}

impl MoreMessages {
    pub fn as_db_value(&self) -> &'static str {
        match self {
            MoreMessages::Unknown => "unknown",
            MoreMessages::True => "true",
            MoreMessages::False => "false",
        }
    }

    pub fn from_db_value(value: &str) -> Self {
        match value {
            "true" => MoreMessages::True,
            "false" => MoreMessages::False,
            _ => MoreMessages::Unknown,
        }
    }
}

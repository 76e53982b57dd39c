use serde::{Deserialize, Serialize};
use std::fmt;

/// Server id of the local-only outbox folder.
pub const OUTBOX_FOLDER_SERVER_ID: &str = "K9MAIL_INTERNAL_OUTBOX";

pub const DEFAULT_VISIBLE_LIMIT: u32 = 25;
pub const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 128 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uuid: AccountId,
    pub name: Option<String>,
    pub email: String,
    pub store_uri: String,

    #[serde(default)]
    pub inbox_folder: Option<String>,
    #[serde(default)]
    pub sent_folder: Option<String>,
    #[serde(default)]
    pub trash_folder: Option<String>,
    #[serde(default)]
    pub drafts_folder: Option<String>,
    #[serde(default)]
    pub archive_folder: Option<String>,
    #[serde(default)]
    pub spam_folder: Option<String>,
    #[serde(default = "default_outbox_folder")]
    pub outbox_folder: String,

    #[serde(default = "default_display_count")]
    pub display_count: u32,
    #[serde(default = "default_max_download_size")]
    pub max_download_size: u64,
}

fn default_outbox_folder() -> String {
    OUTBOX_FOLDER_SERVER_ID.to_string()
}

fn default_display_count() -> u32 {
    DEFAULT_VISIBLE_LIMIT
}

fn default_max_download_size() -> u64 {
    DEFAULT_MAX_DOWNLOAD_SIZE
}

impl Account {
    pub fn new(email: impl Into<String>, store_uri: impl Into<String>) -> Self {
        Self::with_uuid(AccountId::new_random(), email, store_uri)
    }

    pub fn with_uuid(
        uuid: AccountId,
        email: impl Into<String>,
        store_uri: impl Into<String>,
    ) -> Self {
        Self {
            uuid,
            name: None,
            email: email.into(),
            store_uri: store_uri.into(),
            inbox_folder: Some("INBOX".to_string()),
            sent_folder: None,
            trash_folder: None,
            drafts_folder: None,
            archive_folder: None,
            spam_folder: None,
            outbox_folder: default_outbox_folder(),
            display_count: DEFAULT_VISIBLE_LIMIT,
            max_download_size: DEFAULT_MAX_DOWNLOAD_SIZE,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

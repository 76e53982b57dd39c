//! Protocol backends and the dispatch layer that hands them out per account.

pub mod demo;
pub mod imap;
pub mod manager;
pub mod pop3;
pub mod server_settings;
pub mod storage;
pub mod sync;
pub mod webdav;

use std::sync::Arc;

use crate::domain::account::Account;
use crate::domain::email::{Flag, MessageServerId};

pub use manager::BackendManager;
pub use sync::{SyncConfig, SyncListener};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Unsupported account type: {scheme}")]
    UnsupportedAccountType { scheme: String },

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("invalid server settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A live, protocol-bound handle for one account.
///
/// Connections are opened on demand by the operations themselves.
pub trait Backend: Send + Sync {
    /// Short protocol name, for logs.
    fn protocol(&self) -> &'static str;

    fn supports_flags(&self) -> bool;
    fn supports_expunge(&self) -> bool;
    fn supports_move(&self) -> bool {
        false
    }
    fn supports_upload(&self) -> bool {
        false
    }
    fn supports_trash_folder(&self) -> bool;
    fn is_push_capable(&self) -> bool {
        false
    }

    /// Mirrors the server's folder list into local storage.
    fn refresh_folder_list(&self) -> BackendResult<()>;

    fn sync(
        &self,
        folder_server_id: &str,
        config: &SyncConfig,
        listener: &mut dyn SyncListener,
    ) -> BackendResult<()>;

    fn set_flag(
        &self,
        folder_server_id: &str,
        message_server_ids: &[MessageServerId],
        flag: Flag,
        value: bool,
    ) -> BackendResult<()>;

    fn delete_messages(
        &self,
        folder_server_id: &str,
        message_server_ids: &[MessageServerId],
    ) -> BackendResult<()>;

    fn expunge(&self, _folder_server_id: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported("expunge"))
    }

    /// Connects and authenticates without touching local storage.
    fn check_incoming_server_settings(&self) -> BackendResult<()>;
}

/// Builds a [`Backend`] for an account. Must not perform network I/O.
pub trait BackendFactory: Send + Sync {
    fn create_backend(&self, account: &Account) -> BackendResult<Arc<dyn Backend>>;
}

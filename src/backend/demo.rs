//! Offline backend with canned folders and messages, for `demo://` accounts.

use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::storage::BackendStorage;
use crate::backend::sync::{self, RemoteFolder, RemoteMessage, SyncConfig, SyncListener};
use crate::backend::{Backend, BackendFactory, BackendResult};
use crate::domain::account::Account;
use crate::domain::email::{Flag, Flags, MessageData, MessageServerId};
use crate::domain::folder::{FolderInfo, FolderType};
use crate::mail::parse_message;
use crate::store::BackendStorageFactory;

const FOLDERS: [(&str, FolderType); 6] = [
    ("INBOX", FolderType::Inbox),
    ("Sent", FolderType::Sent),
    ("Drafts", FolderType::Drafts),
    ("Trash", FolderType::Trash),
    ("Spam", FolderType::Spam),
    ("Archive", FolderType::Archive),
];

const INBOX_MESSAGES: [(&str, &str, &str); 3] = [
    (
        "Alice <alice@example.org>",
        "Welcome",
        "Hi!\r\n\r\nThis account talks to no server. Everything here is canned.",
    ),
    (
        "Bob <bob@example.org>",
        "Lunch on Friday?",
        "Are we still on for noon at the usual place?",
    ),
    (
        "Carol <carol@example.org>",
        "Quarterly report",
        "The numbers are in. See the summary below.\r\n\r\n> Revenue up 4%",
    ),
];

#[derive(Debug, Clone)]
struct DemoMessage {
    raw: Vec<u8>,
    flags: Flags,
}

/// Folder server id to messages keyed by uid.
type Mailboxes = BTreeMap<String, BTreeMap<u32, DemoMessage>>;

fn canned_mailboxes(email: &str) -> Mailboxes {
    let mut mailboxes: Mailboxes = FOLDERS
        .iter()
        .map(|(id, _)| (id.to_string(), BTreeMap::new()))
        .collect();

    let inbox = mailboxes.entry("INBOX".to_string()).or_default();
    for (i, (from, subject, body)) in INBOX_MESSAGES.iter().enumerate() {
        let uid = i as u32 + 1;
        let raw = format!(
            "From: {from}\r\nTo: {email}\r\nSubject: {subject}\r\n\
             Date: Mon, {day} Jan 2024 09:00:00 +0000\r\n\r\n{body}\r\n",
            day = uid + 1,
        );
        let mut flags = Flags::new();
        if uid == 1 {
            flags.insert(Flag::Seen);
        }
        inbox.insert(
            uid,
            DemoMessage {
                raw: raw.into_bytes(),
                flags,
            },
        );
    }
    mailboxes
}

fn lock(mailboxes: &Mutex<Mailboxes>) -> MutexGuard<'_, Mailboxes> {
    mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct DemoBackendFactory {
    storage_factory: Arc<BackendStorageFactory>,
}

impl DemoBackendFactory {
    pub fn new(storage_factory: Arc<BackendStorageFactory>) -> Self {
        Self { storage_factory }
    }
}

impl BackendFactory for DemoBackendFactory {
    fn create_backend(&self, account: &Account) -> BackendResult<Arc<dyn Backend>> {
        let storage = self.storage_factory.create_backend_storage(account)?;
        Ok(Arc::new(DemoBackend::new(storage, &account.email)))
    }
}

pub struct DemoBackend {
    storage: Arc<dyn BackendStorage>,
    mailboxes: Mutex<Mailboxes>,
}

impl DemoBackend {
    pub fn new(storage: Arc<dyn BackendStorage>, email: &str) -> Self {
        Self {
            storage,
            mailboxes: Mutex::new(canned_mailboxes(email)),
        }
    }

    fn with_messages<F>(&self, folder_server_id: &str, ids: &[MessageServerId], mut f: F) -> Result<()>
    where
        F: FnMut(&mut BTreeMap<u32, DemoMessage>, u32),
    {
        let mut mailboxes = lock(&self.mailboxes);
        let messages = mailboxes
            .get_mut(folder_server_id)
            .ok_or_else(|| anyhow!("no demo folder {folder_server_id}"))?;
        for uid in ids.iter().filter_map(|id| id.parse::<u32>().ok()) {
            f(messages, uid);
        }
        Ok(())
    }
}

impl Backend for DemoBackend {
    fn protocol(&self) -> &'static str {
        "demo"
    }

    fn supports_flags(&self) -> bool {
        true
    }

    fn supports_expunge(&self) -> bool {
        true
    }

    fn supports_trash_folder(&self) -> bool {
        true
    }

    fn refresh_folder_list(&self) -> BackendResult<()> {
        let folders: Vec<FolderInfo> = FOLDERS
            .iter()
            .map(|(id, folder_type)| FolderInfo::new(*id, *id, *folder_type))
            .collect();
        sync::sync_folder_list(self.storage.as_ref(), &folders)?;
        Ok(())
    }

    fn sync(
        &self,
        folder_server_id: &str,
        config: &SyncConfig,
        listener: &mut dyn SyncListener,
    ) -> BackendResult<()> {
        sync::run_sync(
            self.storage.as_ref(),
            folder_server_id,
            config,
            listener,
            self.supports_flags(),
            || {
                let messages = lock(&self.mailboxes)
                    .get(folder_server_id)
                    .cloned()
                    .ok_or_else(|| anyhow!("no demo folder {folder_server_id}"))?;
                Ok(Box::new(DemoRemoteFolder { messages }) as Box<dyn RemoteFolder>)
            },
        )
        .map(|_| ())
    }

    fn set_flag(
        &self,
        folder_server_id: &str,
        message_server_ids: &[MessageServerId],
        flag: Flag,
        value: bool,
    ) -> BackendResult<()> {
        self.with_messages(folder_server_id, message_server_ids, |messages, uid| {
            if let Some(message) = messages.get_mut(&uid) {
                if value {
                    message.flags.insert(flag);
                } else {
                    message.flags.remove(&flag);
                }
            }
        })?;
        Ok(())
    }

    fn delete_messages(
        &self,
        folder_server_id: &str,
        message_server_ids: &[MessageServerId],
    ) -> BackendResult<()> {
        self.with_messages(folder_server_id, message_server_ids, |messages, uid| {
            messages.remove(&uid);
        })?;
        Ok(())
    }

    fn expunge(&self, folder_server_id: &str) -> BackendResult<()> {
        let mut mailboxes = lock(&self.mailboxes);
        if let Some(messages) = mailboxes.get_mut(folder_server_id) {
            messages.retain(|_, m| !m.flags.contains(&Flag::Deleted));
        }
        Ok(())
    }

    fn check_incoming_server_settings(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// Snapshot of one demo folder taken when the sync starts.
struct DemoRemoteFolder {
    messages: BTreeMap<u32, DemoMessage>,
}

impl RemoteFolder for DemoRemoteFolder {
    fn list_messages(&mut self, _config: &SyncConfig) -> Result<Vec<RemoteMessage>> {
        Ok(self
            .messages
            .iter()
            .map(|(uid, m)| RemoteMessage {
                server_id: uid.to_string(),
                size: m.raw.len() as u64,
                flags: m.flags.clone(),
            })
            .collect())
    }

    fn fetch_message(&mut self, message: &RemoteMessage, _full: bool) -> Result<MessageData> {
        let uid: u32 = message.server_id.parse()?;
        let stored = self
            .messages
            .get(&uid)
            .ok_or_else(|| anyhow!("demo message {uid} vanished"))?;
        Ok(parse_message(
            &message.server_id,
            &stored.raw,
            stored.flags.clone(),
            message.size,
        ))
    }
}

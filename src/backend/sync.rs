use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::backend::storage::{BackendFolder, BackendStorage};
use crate::backend::{BackendError, BackendResult};
use crate::domain::email::{Flag, Flags, MessageData, MessageDownloadState, MessageServerId};
use crate::domain::folder::{FolderInfo, MoreMessages};

/// Flags mirrored from the server onto local messages.
const SYNCED_FLAGS: [Flag; 5] = [
    Flag::Seen,
    Flag::Flagged,
    Flag::Answered,
    Flag::Forwarded,
    Flag::Deleted,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub sync_remote_deletions: bool,
    /// Messages larger than this are stored partially. 0 means no limit.
    pub maximum_auto_download_message_size: u64,
    /// Used when a folder has no visible limit of its own. 0 means no limit.
    pub default_visible_limit: u32,
    /// Epoch seconds; older messages are not fetched.
    pub earliest_poll_date: Option<i64>,
    pub sync_flags: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_remote_deletions: true,
            maximum_auto_download_message_size: 128 * 1024,
            default_visible_limit: 25,
            earliest_poll_date: None,
            sync_flags: true,
        }
    }
}

pub trait SyncListener {
    fn sync_started(&mut self, _folder_server_id: &str) {}
    fn sync_new_message(&mut self, _folder_server_id: &str, _message_server_id: &str) {}
    fn sync_removed_message(&mut self, _folder_server_id: &str, _message_server_id: &str) {}
    fn sync_flag_changed(&mut self, _folder_server_id: &str, _message_server_id: &str) {}
    fn sync_finished(&mut self, _folder_server_id: &str) {}
    fn sync_failed(&mut self, _folder_server_id: &str, _message: &str) {}
}

/// Listener that ignores every event.
pub struct NoopSyncListener;

impl SyncListener for NoopSyncListener {}

/// A message as listed by the server, before download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub server_id: MessageServerId,
    pub size: u64,
    pub flags: Flags,
}

/// One open connection to a remote folder for the duration of a sync run.
pub trait RemoteFolder {
    /// Remote messages ordered oldest first.
    fn list_messages(&mut self, config: &SyncConfig) -> Result<Vec<RemoteMessage>>;

    /// Downloads a message; `full == false` fetches headers and a preview only.
    fn fetch_message(&mut self, message: &RemoteMessage, full: bool) -> Result<MessageData>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub new_messages: usize,
    pub removed_messages: usize,
    pub flag_changes: usize,
}

/// Runs one sync of `folder_server_id`, recording failures in the folder status.
pub fn run_sync<F>(
    storage: &dyn BackendStorage,
    folder_server_id: &str,
    config: &SyncConfig,
    listener: &mut dyn SyncListener,
    supports_flags: bool,
    open: F,
) -> BackendResult<SyncSummary>
where
    F: FnOnce() -> Result<Box<dyn RemoteFolder>>,
{
    listener.sync_started(folder_server_id);

    let folder = storage.get_folder(folder_server_id)?;
    let result = open().and_then(|mut remote| {
        let summary = synchronize_folder(
            folder.as_ref(),
            remote.as_mut(),
            config,
            &mut *listener,
            supports_flags,
        );
        if let Err(e) = remote.close() {
            debug!("closing {folder_server_id} after sync: {e}");
        }
        summary
    });

    match result {
        Ok(summary) => {
            info!(
                "synced {folder_server_id}: {} new, {} removed, {} flag changes",
                summary.new_messages, summary.removed_messages, summary.flag_changes
            );
            listener.sync_finished(folder_server_id);
            Ok(summary)
        }
        Err(e) => {
            let message = format!("{e:#}");
            warn!("sync of {folder_server_id} failed: {message}");
            if let Err(status_err) = folder.set_status(Some(&message)) {
                warn!("could not record status for {folder_server_id}: {status_err}");
            }
            listener.sync_failed(folder_server_id, &message);
            Err(BackendError::Other(e))
        }
    }
}

pub fn synchronize_folder(
    folder: &dyn BackendFolder,
    remote: &mut dyn RemoteFolder,
    config: &SyncConfig,
    listener: &mut dyn SyncListener,
    supports_flags: bool,
) -> Result<SyncSummary> {
    let folder_server_id = folder.server_id().to_string();
    let mut summary = SyncSummary::default();

    let remote_messages = remote.list_messages(config)?;
    let remote_ids: HashSet<&str> = remote_messages
        .iter()
        .map(|m| m.server_id.as_str())
        .collect();

    let local = folder.get_all_messages_and_effective_dates()?;

    if config.sync_remote_deletions {
        let mut removed: Vec<MessageServerId> = local
            .keys()
            .filter(|id| !remote_ids.contains(id.as_str()))
            .cloned()
            .collect();
        removed.sort();
        if !removed.is_empty() {
            folder.destroy_messages(&removed)?;
            for id in &removed {
                listener.sync_removed_message(&folder_server_id, id);
            }
            summary.removed_messages = removed.len();
        }
    }

    let visible_limit = match folder.visible_limit() {
        0 => config.default_visible_limit,
        n => n,
    };
    let window = if visible_limit == 0 {
        remote_messages.len()
    } else {
        visible_limit as usize
    };

    for message in remote_messages.iter().rev().take(window) {
        if local.contains_key(&message.server_id) || folder.is_message_present(&message.server_id)? {
            continue;
        }

        let max = config.maximum_auto_download_message_size;
        let full = max == 0 || message.size <= max;
        let data = remote.fetch_message(message, full)?;
        let state = if full {
            MessageDownloadState::Full
        } else {
            MessageDownloadState::Partial
        };
        folder.save_message(&data, state)?;
        listener.sync_new_message(&folder_server_id, &message.server_id);
        summary.new_messages += 1;
    }

    if supports_flags && config.sync_flags {
        for message in remote_messages
            .iter()
            .filter(|m| local.contains_key(&m.server_id))
        {
            let local_flags = folder.get_message_flags(&message.server_id)?;
            let mut changed = false;
            for flag in SYNCED_FLAGS {
                let remote_has = message.flags.contains(&flag);
                if remote_has != local_flags.contains(&flag) {
                    folder.set_message_flag(&message.server_id, flag, remote_has)?;
                    changed = true;
                }
            }
            if changed {
                listener.sync_flag_changed(&folder_server_id, &message.server_id);
                summary.flag_changes += 1;
            }
        }
    }

    let more_messages = if remote_messages.len() > window {
        MoreMessages::True
    } else {
        MoreMessages::False
    };
    folder.set_more_messages(more_messages)?;
    folder.set_last_checked(now_epoch())?;
    folder.set_status(None)?;

    Ok(summary)
}

/// Mirrors a server folder list into local storage.
///
/// New folders are created, vanished ones deleted and the rest renamed or
/// retyped in place. Local-only folders are never touched.
pub fn sync_folder_list(storage: &dyn BackendStorage, remote: &[FolderInfo]) -> Result<()> {
    let local: HashSet<String> = storage.get_folder_server_ids()?.into_iter().collect();
    let remote_ids: HashSet<&str> = remote.iter().map(|f| f.server_id.as_str()).collect();

    let (existing, new): (Vec<&FolderInfo>, Vec<&FolderInfo>) =
        remote.iter().partition(|f| local.contains(&f.server_id));

    let new: Vec<FolderInfo> = new.into_iter().cloned().collect();
    storage.create_folders(&new)?;

    for folder in existing {
        storage.change_folder(&folder.server_id, &folder.name, folder.folder_type)?;
    }

    let mut gone: Vec<String> = local
        .into_iter()
        .filter(|id| !remote_ids.contains(id.as_str()))
        .collect();
    gone.sort();
    storage.delete_folders(&gone)?;

    debug!(
        "folder list: {} remote, {} created, {} deleted",
        remote.len(),
        new.len(),
        gone.len()
    );
    Ok(())
}

pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::folder::FolderType;
    use crate::store::backend_storage::LocalBackendStorage;
    use crate::store::listenable::ListenableMessageStore;
    use crate::store::sqlite::SqliteMessageStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct FakeRemote {
        messages: Vec<RemoteMessage>,
        fetched: Vec<(String, bool)>,
    }

    impl FakeRemote {
        fn new(messages: &[(&str, u64, &[Flag])]) -> Self {
            let messages = messages
                .iter()
                .map(|(id, size, flags)| RemoteMessage {
                    server_id: id.to_string(),
                    size: *size,
                    flags: flags.iter().copied().collect(),
                })
                .collect();
            Self {
                messages,
                fetched: Vec::new(),
            }
        }
    }

    impl RemoteFolder for FakeRemote {
        fn list_messages(&mut self, _config: &SyncConfig) -> Result<Vec<RemoteMessage>> {
            Ok(self.messages.clone())
        }

        fn fetch_message(&mut self, message: &RemoteMessage, full: bool) -> Result<MessageData> {
            self.fetched.push((message.server_id.clone(), full));
            Ok(MessageData {
                server_id: message.server_id.clone(),
                subject: format!("message {}", message.server_id),
                sender: "alice@example.org".to_string(),
                date_epoch: 0,
                size: message.size,
                flags: message.flags.clone(),
                body: String::new(),
                preview: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl SyncListener for Recorder {
        fn sync_new_message(&mut self, _folder: &str, id: &str) {
            self.events.push(format!("new {id}"));
        }
        fn sync_removed_message(&mut self, _folder: &str, id: &str) {
            self.events.push(format!("removed {id}"));
        }
        fn sync_flag_changed(&mut self, _folder: &str, id: &str) {
            self.events.push(format!("flags {id}"));
        }
        fn sync_failed(&mut self, _folder: &str, message: &str) {
            self.events.push(format!("failed {message}"));
        }
    }

    fn storage_with_inbox(visible_limit: u32) -> Result<LocalBackendStorage> {
        let store = SqliteMessageStore::open_in_memory()?.with_default_visible_limit(visible_limit);
        let storage = LocalBackendStorage::new(Arc::new(ListenableMessageStore::new(Box::new(store))));
        storage.create_folders(&[FolderInfo::new("INBOX", "Inbox", FolderType::Inbox)])?;
        Ok(storage)
    }

    #[test]
    fn downloads_newest_messages_within_visible_limit() -> Result<()> {
        let storage = storage_with_inbox(2)?;
        let folder = storage.get_folder("INBOX")?;
        let mut remote = FakeRemote::new(&[("1", 10, &[]), ("2", 10, &[]), ("3", 500, &[])]);
        let config = SyncConfig {
            maximum_auto_download_message_size: 100,
            ..SyncConfig::default()
        };
        let mut recorder = Recorder::default();

        let summary = synchronize_folder(folder.as_ref(), &mut remote, &config, &mut recorder, true)?;

        assert_eq!(summary.new_messages, 2);
        assert_eq!(recorder.events, vec!["new 3", "new 2"]);
        assert_eq!(
            remote.fetched,
            vec![("3".to_string(), false), ("2".to_string(), true)]
        );
        assert!(folder.get_message_flags("3")?.contains(&Flag::DownloadedPartial));
        assert!(folder.get_message_flags("2")?.contains(&Flag::DownloadedFull));
        assert!(!folder.is_message_present("1")?);
        assert_eq!(folder.get_more_messages()?, MoreMessages::True);
        Ok(())
    }

    #[test]
    fn removes_vanished_messages_and_syncs_flags() -> Result<()> {
        let storage = storage_with_inbox(25)?;
        let folder = storage.get_folder("INBOX")?;
        let config = SyncConfig::default();

        let mut first = FakeRemote::new(&[("1", 10, &[]), ("2", 10, &[])]);
        synchronize_folder(folder.as_ref(), &mut first, &config, &mut NoopSyncListener, true)?;

        let mut second = FakeRemote::new(&[("2", 10, &[Flag::Seen])]);
        let mut recorder = Recorder::default();
        let summary = synchronize_folder(folder.as_ref(), &mut second, &config, &mut recorder, true)?;

        assert_eq!(recorder.events, vec!["removed 1", "flags 2"]);
        assert_eq!(summary.removed_messages, 1);
        assert!(second.fetched.is_empty());
        assert!(folder.get_message_flags("2")?.contains(&Flag::Seen));
        Ok(())
    }

    #[test]
    fn failure_is_recorded_as_folder_status() -> Result<()> {
        let storage = storage_with_inbox(25)?;
        let mut recorder = Recorder::default();

        let result = run_sync(&storage, "INBOX", &SyncConfig::default(), &mut recorder, true, || {
            Err(anyhow::anyhow!("connection refused"))
        });

        assert!(result.is_err());
        assert_eq!(recorder.events, vec!["failed connection refused"]);
        Ok(())
    }

    #[test]
    fn folder_list_is_mirrored() -> Result<()> {
        let storage = storage_with_inbox(25)?;
        storage.create_folders(&[FolderInfo::new("Old", "Old", FolderType::Regular)])?;

        sync_folder_list(
            &storage,
            &[
                FolderInfo::new("INBOX", "Inbox", FolderType::Inbox),
                FolderInfo::new("Sent", "Sent Items", FolderType::Sent),
            ],
        )?;

        let mut ids = storage.get_folder_server_ids()?;
        ids.sort();
        assert_eq!(ids, vec!["INBOX", "Sent"]);
        assert_eq!(storage.get_folder("Sent")?.name(), "Sent Items");
        Ok(())
    }
}

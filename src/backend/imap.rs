use anyhow::{Result, anyhow, bail};
use chrono::DateTime;
use imap::types::{Flag as ImapFlag, NameAttribute};
use log::{debug, info, warn};
use native_tls::{TlsConnector, TlsStream};
use std::net::TcpStream;
use std::sync::Arc;

use crate::account::credentials::PasswordProvider;
use crate::backend::server_settings::{AuthType, ConnectionSecurity, ServerSettings, decode_store_uri};
use crate::backend::storage::BackendStorage;
use crate::backend::sync::{self, RemoteFolder, RemoteMessage, SyncConfig, SyncListener};
use crate::backend::{Backend, BackendError, BackendFactory, BackendResult};
use crate::domain::account::{Account, AccountId};
use crate::domain::email::{Flag, Flags, MessageData, MessageServerId};
use crate::domain::folder::{FolderInfo, FolderType};
use crate::mail::parse_message;
use crate::store::BackendStorageFactory;

type ImapSession = imap::Session<TlsStream<TcpStream>>;

const FORWARDED_KEYWORD: &str = "$Forwarded";

pub struct ImapBackendFactory {
    storage_factory: Arc<BackendStorageFactory>,
    passwords: Arc<dyn PasswordProvider>,
}

impl ImapBackendFactory {
    pub fn new(
        storage_factory: Arc<BackendStorageFactory>,
        passwords: Arc<dyn PasswordProvider>,
    ) -> Self {
        Self {
            storage_factory,
            passwords,
        }
    }
}

impl BackendFactory for ImapBackendFactory {
    fn create_backend(&self, account: &Account) -> BackendResult<Arc<dyn Backend>> {
        let settings = decode_store_uri(&account.store_uri)?;
        let storage = self.storage_factory.create_backend_storage(account)?;
        Ok(Arc::new(ImapBackend {
            account_id: account.uuid.clone(),
            settings,
            storage,
            passwords: self.passwords.clone(),
        }))
    }
}

pub struct ImapBackend {
    account_id: AccountId,
    settings: ServerSettings,
    storage: Arc<dyn BackendStorage>,
    passwords: Arc<dyn PasswordProvider>,
}

impl ImapBackend {
    fn connect_and_auth(&self) -> Result<ImapSession> {
        let s = &self.settings;
        let tls = TlsConnector::builder().build()?;
        let addr = (s.host.as_str(), s.port);

        let client = match s.security {
            ConnectionSecurity::SslTls => imap::connect(addr, s.host.as_str(), &tls)?,
            ConnectionSecurity::StartTls => imap::connect_starttls(addr, s.host.as_str(), &tls)?,
            ConnectionSecurity::None => bail!("refusing plain-text IMAP connection to {}", s.host),
        };

        if s.auth_type != AuthType::Plain {
            bail!("IMAP authentication {:?} is not supported", s.auth_type);
        }
        let password = s.resolve_password(&self.account_id, self.passwords.as_ref())?;
        client
            .login(&s.username, &password)
            .map_err(|(e, _)| anyhow!("IMAP login as {} failed: {e}", s.username))
    }

    /// Server mailbox name for a folder, with the path prefix applied.
    fn mailbox_name(&self, folder_server_id: &str) -> String {
        match &self.settings.path_prefix {
            Some(prefix) if !folder_server_id.eq_ignore_ascii_case("INBOX") => {
                format!("{prefix}{folder_server_id}")
            }
            _ => folder_server_id.to_string(),
        }
    }

    fn store_flag(
        &self,
        folder_server_id: &str,
        uids: &[MessageServerId],
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        let Some(name) = imap_flag_name(flag) else {
            debug!("flag {flag} is local only");
            return Ok(());
        };
        if uids.is_empty() {
            return Ok(());
        }

        let mut session = self.connect_and_auth()?;
        session.select(self.mailbox_name(folder_server_id))?;
        let op = if value { "+FLAGS.SILENT" } else { "-FLAGS.SILENT" };
        session.uid_store(uids.join(","), format!("{op} ({name})"))?;
        session.logout()?;
        Ok(())
    }
}

impl Backend for ImapBackend {
    fn protocol(&self) -> &'static str {
        "imap"
    }

    fn supports_flags(&self) -> bool {
        true
    }

    fn supports_expunge(&self) -> bool {
        true
    }

    fn supports_move(&self) -> bool {
        true
    }

    fn supports_upload(&self) -> bool {
        true
    }

    fn supports_trash_folder(&self) -> bool {
        true
    }

    fn is_push_capable(&self) -> bool {
        true
    }

    fn refresh_folder_list(&self) -> BackendResult<()> {
        let mut session = self.connect_and_auth()?;
        let names = session.list(None, Some("*"))?;

        let prefix = self.settings.path_prefix.as_deref().unwrap_or("");
        let mut folders = Vec::new();
        for name in names.iter() {
            let attributes = name.attributes();
            if attributes.iter().any(|a| matches!(a, NameAttribute::NoSelect)) {
                continue;
            }
            let full_name = name.name();
            let server_id = if full_name.eq_ignore_ascii_case("INBOX") {
                "INBOX"
            } else {
                full_name.strip_prefix(prefix).unwrap_or(full_name)
            };
            let folder_type = folder_type_from_attributes(server_id, attributes);
            folders.push(FolderInfo::new(server_id, server_id, folder_type));
        }
        session.logout()?;

        info!("IMAP server lists {} selectable folder(s)", folders.len());
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
                let mut session = self.connect_and_auth()?;
                session.select(self.mailbox_name(folder_server_id))?;
                Ok(Box::new(ImapRemoteFolder { session }) as Box<dyn RemoteFolder>)
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
        Ok(self.store_flag(folder_server_id, message_server_ids, flag, value)?)
    }

    fn delete_messages(
        &self,
        folder_server_id: &str,
        message_server_ids: &[MessageServerId],
    ) -> BackendResult<()> {
        Ok(self.store_flag(folder_server_id, message_server_ids, Flag::Deleted, true)?)
    }

    fn expunge(&self, folder_server_id: &str) -> BackendResult<()> {
        let mut session = self.connect_and_auth()?;
        session.select(self.mailbox_name(folder_server_id))?;
        session.expunge()?;
        session.logout()?;
        Ok(())
    }

    fn check_incoming_server_settings(&self) -> BackendResult<()> {
        let mut session = self.connect_and_auth()?;
        session.noop()?;
        session.logout()?;
        Ok(())
    }
}

struct ImapRemoteFolder {
    session: ImapSession,
}

impl RemoteFolder for ImapRemoteFolder {
    fn list_messages(&mut self, config: &SyncConfig) -> Result<Vec<RemoteMessage>> {
        let query = match config.earliest_poll_date {
            Some(epoch) => {
                let date = imap_date(epoch)
                    .ok_or_else(|| anyhow!("earliest poll date {epoch} out of range"))?;
                format!("SINCE {date}")
            }
            None => "ALL".to_string(),
        };
        let mut uids: Vec<u32> = self.session.uid_search(query)?.into_iter().collect();
        if uids.is_empty() {
            return Ok(vec![]);
        }
        uids.sort_unstable();

        let set = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let fetches = self.session.uid_fetch(set, "(UID FLAGS RFC822.SIZE)")?;

        let mut messages: Vec<(u32, RemoteMessage)> = fetches
            .iter()
            .filter_map(|f| {
                let uid = f.uid?;
                Some((
                    uid,
                    RemoteMessage {
                        server_id: uid.to_string(),
                        size: f.size.map(u64::from).unwrap_or(0),
                        flags: flags_from_imap(f.flags()),
                    },
                ))
            })
            .collect();
        messages.sort_by_key(|(uid, _)| *uid);
        Ok(messages.into_iter().map(|(_, m)| m).collect())
    }

    fn fetch_message(&mut self, message: &RemoteMessage, full: bool) -> Result<MessageData> {
        let query = if full {
            "(UID BODY.PEEK[])"
        } else {
            "(UID BODY.PEEK[HEADER])"
        };

        let mut raw = self.fetch_raw(&message.server_id, query, full)?;
        if raw.is_none() {
            // some servers drop the literal on the first try
            warn!("UID {} returned no data; retrying once", message.server_id);
            raw = self.fetch_raw(&message.server_id, query, full)?;
        }
        let raw = raw.ok_or_else(|| anyhow!("UID {}: no message data", message.server_id))?;

        Ok(parse_message(
            &message.server_id,
            &raw,
            message.flags.clone(),
            message.size,
        ))
    }

    fn close(&mut self) -> Result<()> {
        self.session.logout()?;
        Ok(())
    }
}

impl ImapRemoteFolder {
    fn fetch_raw(&mut self, uid: &str, query: &str, full: bool) -> Result<Option<Vec<u8>>> {
        let fetches = self.session.uid_fetch(uid, query)?;
        Ok(fetches
            .iter()
            .next()
            .and_then(|f| if full { f.body() } else { f.header() })
            .map(<[u8]>::to_vec))
    }
}

fn flags_from_imap(flags: &[ImapFlag<'_>]) -> Flags {
    flags
        .iter()
        .filter_map(|flag| match flag {
            ImapFlag::Seen => Some(Flag::Seen),
            ImapFlag::Answered => Some(Flag::Answered),
            ImapFlag::Flagged => Some(Flag::Flagged),
            ImapFlag::Deleted => Some(Flag::Deleted),
            ImapFlag::Draft => Some(Flag::Draft),
            ImapFlag::Recent => Some(Flag::Recent),
            ImapFlag::Custom(keyword) if keyword.eq_ignore_ascii_case(FORWARDED_KEYWORD) => {
                Some(Flag::Forwarded)
            }
            _ => None,
        })
        .collect()
}

fn imap_flag_name(flag: Flag) -> Option<&'static str> {
    match flag {
        Flag::Seen => Some("\\Seen"),
        Flag::Answered => Some("\\Answered"),
        Flag::Flagged => Some("\\Flagged"),
        Flag::Deleted => Some("\\Deleted"),
        Flag::Draft => Some("\\Draft"),
        Flag::Forwarded => Some(FORWARDED_KEYWORD),
        Flag::Recent | Flag::DownloadedFull | Flag::DownloadedPartial => None,
    }
}

fn folder_type_from_attributes(server_id: &str, attributes: &[NameAttribute<'_>]) -> FolderType {
    if server_id == "INBOX" {
        return FolderType::Inbox;
    }
    attributes
        .iter()
        .find_map(|attribute| match attribute {
            NameAttribute::Custom(name) => match name.to_ascii_lowercase().as_str() {
                "\\sent" => Some(FolderType::Sent),
                "\\trash" => Some(FolderType::Trash),
                "\\drafts" => Some(FolderType::Drafts),
                "\\archive" | "\\all" => Some(FolderType::Archive),
                "\\junk" => Some(FolderType::Spam),
                _ => None,
            },
            _ => None,
        })
        .unwrap_or(FolderType::Regular)
}

/// Formats epoch seconds as an IMAP search date (`1-Jul-2003`).
fn imap_date(epoch: i64) -> Option<String> {
    DateTime::from_timestamp(epoch, 0).map(|d| d.format("%-d-%b-%Y").to_string())
}

impl From<imap::error::Error> for BackendError {
    fn from(e: imap::error::Error) -> Self {
        BackendError::Other(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn search_dates() {
        assert_eq!(imap_date(0).as_deref(), Some("1-Jan-1970"));
        assert_eq!(imap_date(1_057_049_557).as_deref(), Some("1-Jul-2003"));
        assert_eq!(imap_date(951_782_400).as_deref(), Some("29-Feb-2000"));
        assert_eq!(imap_date(i64::MAX), None);
    }

    #[test]
    fn special_use_attributes_map_to_folder_types() {
        let sent = [NameAttribute::Custom(Cow::Borrowed("\\Sent"))];
        let junk = [NameAttribute::Marked, NameAttribute::Custom(Cow::Borrowed("\\Junk"))];

        assert_eq!(folder_type_from_attributes("Sent Items", &sent), FolderType::Sent);
        assert_eq!(folder_type_from_attributes("Spam", &junk), FolderType::Spam);
        assert_eq!(folder_type_from_attributes("INBOX", &[]), FolderType::Inbox);
        assert_eq!(folder_type_from_attributes("Work", &[]), FolderType::Regular);
    }

    #[test]
    fn flags_translate_both_ways() {
        let flags = flags_from_imap(&[
            ImapFlag::Seen,
            ImapFlag::Custom(Cow::Borrowed("$Forwarded")),
            ImapFlag::Custom(Cow::Borrowed("$Label1")),
        ]);
        assert_eq!(flags, Flags::from([Flag::Seen, Flag::Forwarded]));

        assert_eq!(imap_flag_name(Flag::Forwarded), Some("$Forwarded"));
        assert_eq!(imap_flag_name(Flag::DownloadedFull), None);
    }
}

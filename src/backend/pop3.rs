//! POP3 backend: a single INBOX, no server-side flags.

use anyhow::{Result, anyhow, bail};
use log::{debug, info};
use native_tls::{TlsConnector, TlsStream};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
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

const INBOX: &str = "INBOX";

/// Body lines requested with TOP for a partial download.
const PREVIEW_LINES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub count: u32,
    pub total_size: u64,
}

/// Blocking POP3 command channel over any byte stream.
pub struct Pop3Connection<S: Read + Write> {
    reader: BufReader<S>,
}

impl<S: Read + Write> Pop3Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    /// One line with its CRLF stripped, bytes untouched.
    fn read_raw_line(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed").into());
        }
        while matches!(buf.last(), Some(b'\r' | b'\n')) {
            buf.pop();
        }
        Ok(buf)
    }

    fn read_line(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read_raw_line()?).into_owned())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    fn read_status(&mut self) -> Result<String> {
        let line = self.read_line()?;
        match line.strip_prefix("+OK") {
            Some(rest) => Ok(rest.trim().to_string()),
            None => bail!("POP3 server said: {line}"),
        }
    }

    fn command(&mut self, line: &str) -> Result<String> {
        self.write_line(line)?;
        self.read_status()
    }

    /// Lines up to the terminating ".", with dot-stuffing undone.
    fn read_multiline(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        loop {
            let mut line = self.read_raw_line()?;
            if line == b"." {
                return Ok(lines);
            }
            if line.first() == Some(&b'.') {
                line.remove(0);
            }
            lines.push(line);
        }
    }

    /// Listing lines are ASCII; anything else is dropped.
    fn read_listing(&mut self) -> Result<Vec<String>> {
        Ok(self
            .read_multiline()?
            .into_iter()
            .filter_map(|line| String::from_utf8(line).ok())
            .collect())
    }

    fn read_body(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for line in self.read_multiline()? {
            out.extend_from_slice(&line);
            out.extend_from_slice(b"\r\n");
        }
        Ok(out)
    }

    pub fn read_greeting(&mut self) -> Result<()> {
        self.read_status().map(|_| ())
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.command(&format!("USER {username}"))?;
        self.write_line(&format!("PASS {password}"))?;
        self.read_status()
            .map(|_| ())
            .map_err(|e| anyhow!("POP3 login as {username} failed: {e}"))
    }

    pub fn stls(&mut self) -> Result<()> {
        self.command("STLS").map(|_| ())
    }

    pub fn stat(&mut self) -> Result<Stat> {
        let rest = self.command("STAT")?;
        let mut parts = rest.split_whitespace();
        let count = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let total_size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(Stat { count, total_size })
    }

    /// Message number to unique id.
    pub fn uidl(&mut self) -> Result<Vec<(u32, String)>> {
        self.command("UIDL")?;
        Ok(self
            .read_listing()?
            .iter()
            .filter_map(|line| {
                let (no, uid) = line.split_once(' ')?;
                Some((no.parse().ok()?, uid.trim().to_string()))
            })
            .collect())
    }

    /// Message number to size in octets.
    pub fn list(&mut self) -> Result<HashMap<u32, u64>> {
        self.command("LIST")?;
        Ok(self
            .read_listing()?
            .iter()
            .filter_map(|line| {
                let (no, size) = line.split_once(' ')?;
                Some((no.parse().ok()?, size.trim().parse().ok()?))
            })
            .collect())
    }

    pub fn retr(&mut self, msg_no: u32) -> Result<Vec<u8>> {
        self.command(&format!("RETR {msg_no}"))?;
        self.read_body()
    }

    /// Headers plus the first `lines` body lines.
    pub fn top(&mut self, msg_no: u32, lines: u32) -> Result<Vec<u8>> {
        self.command(&format!("TOP {msg_no} {lines}"))?;
        self.read_body()
    }

    pub fn dele(&mut self, msg_no: u32) -> Result<()> {
        self.command(&format!("DELE {msg_no}")).map(|_| ())
    }

    /// Ends the session; pending deletions are committed by the server.
    pub fn quit(&mut self) -> Result<()> {
        self.command("QUIT").map(|_| ())
    }
}

pub enum Pop3Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Read for Pop3Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Pop3Stream::Plain(s) => s.read(buf),
            Pop3Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Pop3Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Pop3Stream::Plain(s) => s.write(buf),
            Pop3Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Pop3Stream::Plain(s) => s.flush(),
            Pop3Stream::Tls(s) => s.flush(),
        }
    }
}

fn tls_handshake(host: &str, tcp: TcpStream) -> Result<Pop3Stream> {
    let tls = TlsConnector::builder().build()?;
    let stream = tls
        .connect(host, tcp)
        .map_err(|e| anyhow!("TLS handshake with {host} failed: {e}"))?;
    Ok(Pop3Stream::Tls(Box::new(stream)))
}

pub fn connect(settings: &ServerSettings, password: &str) -> Result<Pop3Connection<Pop3Stream>> {
    if settings.auth_type != AuthType::Plain {
        bail!("POP3 authentication {:?} is not supported", settings.auth_type);
    }
    let host = settings.host.as_str();
    let tcp = TcpStream::connect((host, settings.port))?;

    let mut conn = match settings.security {
        ConnectionSecurity::SslTls => {
            let mut conn = Pop3Connection::new(tls_handshake(host, tcp)?);
            conn.read_greeting()?;
            conn
        }
        ConnectionSecurity::StartTls => {
            let mut plain = Pop3Connection::new(tcp);
            plain.read_greeting()?;
            plain.stls()?;
            Pop3Connection::new(tls_handshake(host, plain.into_inner())?)
        }
        ConnectionSecurity::None => {
            let mut conn = Pop3Connection::new(Pop3Stream::Plain(tcp));
            conn.read_greeting()?;
            conn
        }
    };

    conn.login(&settings.username, password)?;
    debug!("POP3 session open on {host}:{}", settings.port);
    Ok(conn)
}

pub struct Pop3BackendFactory {
    storage_factory: Arc<BackendStorageFactory>,
    passwords: Arc<dyn PasswordProvider>,
}

impl Pop3BackendFactory {
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

impl BackendFactory for Pop3BackendFactory {
    fn create_backend(&self, account: &Account) -> BackendResult<Arc<dyn Backend>> {
        let settings = decode_store_uri(&account.store_uri)?;
        let storage = self.storage_factory.create_backend_storage(account)?;
        Ok(Arc::new(Pop3Backend {
            account_id: account.uuid.clone(),
            settings,
            storage,
            passwords: self.passwords.clone(),
        }))
    }
}

pub struct Pop3Backend {
    account_id: AccountId,
    settings: ServerSettings,
    storage: Arc<dyn BackendStorage>,
    passwords: Arc<dyn PasswordProvider>,
}

impl Pop3Backend {
    fn open(&self) -> Result<Pop3Connection<Pop3Stream>> {
        let password = self
            .settings
            .resolve_password(&self.account_id, self.passwords.as_ref())?;
        connect(&self.settings, &password)
    }

    fn ensure_inbox(folder_server_id: &str) -> BackendResult<()> {
        if folder_server_id == INBOX {
            Ok(())
        } else {
            Err(BackendError::Other(anyhow!(
                "POP3 has no folder {folder_server_id}"
            )))
        }
    }
}

impl Backend for Pop3Backend {
    fn protocol(&self) -> &'static str {
        "pop3"
    }

    fn supports_flags(&self) -> bool {
        false
    }

    fn supports_expunge(&self) -> bool {
        false
    }

    fn supports_trash_folder(&self) -> bool {
        false
    }

    fn refresh_folder_list(&self) -> BackendResult<()> {
        sync::sync_folder_list(
            self.storage.as_ref(),
            &[FolderInfo::new(INBOX, INBOX, FolderType::Inbox)],
        )?;
        Ok(())
    }

    fn sync(
        &self,
        folder_server_id: &str,
        config: &SyncConfig,
        listener: &mut dyn SyncListener,
    ) -> BackendResult<()> {
        Self::ensure_inbox(folder_server_id)?;
        sync::run_sync(
            self.storage.as_ref(),
            folder_server_id,
            config,
            listener,
            self.supports_flags(),
            || {
                Ok(Box::new(Pop3RemoteFolder {
                    conn: self.open()?,
                    numbers: HashMap::new(),
                }) as Box<dyn RemoteFolder>)
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
        match (flag, value) {
            (Flag::Deleted, true) => self.delete_messages(folder_server_id, message_server_ids),
            _ => {
                debug!("POP3 keeps flag {flag} locally");
                Ok(())
            }
        }
    }

    fn delete_messages(
        &self,
        folder_server_id: &str,
        message_server_ids: &[MessageServerId],
    ) -> BackendResult<()> {
        Self::ensure_inbox(folder_server_id)?;
        if message_server_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.open()?;
        let numbers: HashMap<String, u32> =
            conn.uidl()?.into_iter().map(|(no, uid)| (uid, no)).collect();
        let mut deleted = 0;
        for uid in message_server_ids {
            if let Some(&no) = numbers.get(uid) {
                conn.dele(no)?;
                deleted += 1;
            }
        }
        conn.quit()?;
        info!("deleted {deleted} POP3 message(s)");
        Ok(())
    }

    fn check_incoming_server_settings(&self) -> BackendResult<()> {
        let mut conn = self.open()?;
        let stat = conn.stat()?;
        debug!("POP3 mailbox holds {} message(s)", stat.count);
        conn.quit()?;
        Ok(())
    }
}

struct Pop3RemoteFolder {
    conn: Pop3Connection<Pop3Stream>,
    numbers: HashMap<MessageServerId, u32>,
}

impl Pop3RemoteFolder {
    fn number_of(&self, server_id: &str) -> Result<u32> {
        self.numbers
            .get(server_id)
            .copied()
            .ok_or_else(|| anyhow!("message {server_id} is no longer on the server"))
    }
}

impl RemoteFolder for Pop3RemoteFolder {
    fn list_messages(&mut self, _config: &SyncConfig) -> Result<Vec<RemoteMessage>> {
        let mut uids = self.conn.uidl()?;
        let sizes = self.conn.list()?;
        uids.sort_by_key(|(no, _)| *no);

        self.numbers = uids.iter().map(|(no, uid)| (uid.clone(), *no)).collect();
        Ok(uids
            .into_iter()
            .map(|(no, uid)| RemoteMessage {
                server_id: uid,
                size: sizes.get(&no).copied().unwrap_or(0),
                flags: Flags::new(),
            })
            .collect())
    }

    fn fetch_message(&mut self, message: &RemoteMessage, full: bool) -> Result<MessageData> {
        let no = self.number_of(&message.server_id)?;
        let raw = if full {
            self.conn.retr(no)?
        } else {
            self.conn.top(no, PREVIEW_LINES)?
        };
        Ok(parse_message(
            &message.server_id,
            &raw,
            Flags::new(),
            message.size,
        ))
    }

    fn close(&mut self) -> Result<()> {
        self.conn.quit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays a canned server transcript and records what the client sent.
    struct Script {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Script {
        fn new(server: &str) -> Self {
            Self::from_bytes(server.as_bytes())
        }

        fn from_bytes(server: &[u8]) -> Self {
            Self {
                input: Cursor::new(server.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn login_and_listing() -> Result<()> {
        let mut conn = Pop3Connection::new(Script::new(
            "+OK ready\r\n\
             +OK user\r\n\
             +OK pass\r\n\
             +OK\r\n1 abc\r\n2 def\r\n.\r\n\
             +OK\r\n1 120\r\n2 4096\r\n.\r\n\
             +OK 2 4216\r\n",
        ));
        conn.read_greeting()?;
        conn.login("bob", "secret")?;

        assert_eq!(conn.uidl()?, vec![(1, "abc".to_string()), (2, "def".to_string())]);
        assert_eq!(conn.list()?, HashMap::from([(1, 120), (2, 4096)]));
        assert_eq!(
            conn.stat()?,
            Stat {
                count: 2,
                total_size: 4216
            }
        );

        let sent = String::from_utf8(conn.into_inner().output)?;
        assert_eq!(sent, "USER bob\r\nPASS secret\r\nUIDL\r\nLIST\r\nSTAT\r\n");
        Ok(())
    }

    #[test]
    fn retr_undoes_dot_stuffing() -> Result<()> {
        let mut conn = Pop3Connection::new(Script::new(
            "+OK 30 octets\r\nSubject: x\r\n\r\n..leading dot\r\n.\r\n",
        ));
        let body = conn.retr(1)?;
        assert_eq!(body, b"Subject: x\r\n\r\n.leading dot\r\n");
        Ok(())
    }

    #[test]
    fn retr_keeps_eight_bit_bytes() -> Result<()> {
        let mut conn = Pop3Connection::new(Script::from_bytes(
            b"+OK\r\nContent-Type: text/plain; charset=iso-8859-1\r\n\r\ncaf\xe9\r\n.\r\n",
        ));
        let body = conn.retr(1)?;
        assert!(body.ends_with(b"\r\n\r\ncaf\xe9\r\n"));

        let message = parse_message("1", &body, Flags::new(), body.len() as u64);
        assert_eq!(message.body.trim_end(), "caf\u{e9}");
        Ok(())
    }

    #[test]
    fn err_response_fails_the_command() {
        let mut conn = Pop3Connection::new(Script::new("+OK\r\n-ERR invalid password\r\n"));
        let err = conn.login("bob", "wrong").err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("POP3 login as bob failed: POP3 server said: -ERR invalid password")
        );
    }

    #[test]
    fn connection_closed_mid_response() {
        let mut conn = Pop3Connection::new(Script::new("+OK\r\n1 abc\r\n"));
        assert!(conn.uidl().is_err());
    }
}

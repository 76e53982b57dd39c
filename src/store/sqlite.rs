use anyhow::{Result, anyhow};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::account::DEFAULT_VISIBLE_LIMIT;
use crate::domain::email::{Flag, Flags, MessageData, MessageDownloadState, MessageServerId};
use crate::domain::folder::{FolderDetails, FolderId, FolderInfo, FolderType, MoreMessages};
use crate::store::repo::{MessageStore, StoredMessage};

const FOLDER_COLUMNS: &str =
    "id, server_id, name, type, local_only, visible_limit, last_updated, status";

pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
    default_visible_limit: u32,
}

impl SqliteMessageStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            default_visible_limit: DEFAULT_VISIBLE_LIMIT,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Visible limit given to folders created from now on.
    pub fn with_default_visible_limit(mut self, visible_limit: u32) -> Self {
        self.default_visible_limit = visible_limit;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                id             INTEGER PRIMARY KEY,
                server_id      TEXT NOT NULL UNIQUE,
                name           TEXT NOT NULL,
                type           TEXT NOT NULL DEFAULT 'regular',
                local_only     INTEGER NOT NULL DEFAULT 0,
                visible_limit  INTEGER NOT NULL DEFAULT 25,
                more_messages  TEXT NOT NULL DEFAULT 'unknown',
                last_updated   INTEGER,
                status         TEXT,
                push_state     TEXT
            );

            CREATE TABLE IF NOT EXISTS folder_extra_values (
                folder_id      INTEGER NOT NULL,
                name           TEXT NOT NULL,
                value_text     TEXT,
                value_integer  INTEGER,
                PRIMARY KEY (folder_id, name)
            );

            CREATE TABLE IF NOT EXISTS account_extra_values (
                name           TEXT PRIMARY KEY,
                value_text     TEXT,
                value_integer  INTEGER
            );

            CREATE TABLE IF NOT EXISTS messages (
                id             INTEGER PRIMARY KEY,
                folder_id      INTEGER NOT NULL,
                uid            TEXT NOT NULL,
                subject        TEXT NOT NULL DEFAULT '',
                sender         TEXT NOT NULL DEFAULT '',
                date           INTEGER,
                size           INTEGER NOT NULL DEFAULT 0,
                read           INTEGER NOT NULL DEFAULT 0,
                flagged        INTEGER NOT NULL DEFAULT 0,
                answered       INTEGER NOT NULL DEFAULT 0,
                forwarded      INTEGER NOT NULL DEFAULT 0,
                deleted        INTEGER NOT NULL DEFAULT 0,
                flags          TEXT NOT NULL DEFAULT '',
                preview        TEXT NOT NULL DEFAULT '',
                body           TEXT,
                download_state TEXT NOT NULL DEFAULT 'envelope',
                UNIQUE (folder_id, uid)
            );

            CREATE INDEX IF NOT EXISTS msg_folder_date ON messages (folder_id, date);
            "#,
        )?;
        Ok(())
    }

    fn folder_string(&self, folder_id: FolderId, column: &str) -> Result<Option<String>> {
        let sql = format!("SELECT {column} FROM folders WHERE id = ?1");
        let value = self
            .conn()
            .query_row(&sql, params![folder_id], |r| r.get::<_, Option<String>>(0))
            .optional()?
            .ok_or_else(|| anyhow!("folder {folder_id} not found"))?;
        Ok(value)
    }

    fn set_folder_column<T: rusqlite::ToSql>(
        &self,
        folder_id: FolderId,
        column: &str,
        value: T,
    ) -> Result<()> {
        let sql = format!("UPDATE folders SET {column} = ?1 WHERE id = ?2");
        let updated = self.conn().execute(&sql, params![value, folder_id])?;
        if updated == 0 {
            return Err(anyhow!("folder {folder_id} not found"));
        }
        Ok(())
    }
}

fn folder_from_row(r: &Row<'_>) -> rusqlite::Result<FolderDetails> {
    Ok(FolderDetails {
        id: r.get(0)?,
        server_id: r.get(1)?,
        name: r.get(2)?,
        server_type: FolderType::from_db(&r.get::<_, String>(3)?),
        local_only: r.get::<_, i64>(4)? != 0,
        visible_limit: r.get::<_, i64>(5)?.max(0) as u32,
        last_checked: r.get(6)?,
        status: r.get(7)?,
    })
}

fn parse_flags(value: &str) -> Flags {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<Flag>().ok())
        .collect()
}

fn join_flags(flags: &Flags) -> String {
    flags
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Column backing a flag, for the flags that have one.
fn flag_column(flag: Flag) -> Option<&'static str> {
    match flag {
        Flag::Deleted => Some("deleted"),
        Flag::Seen => Some("read"),
        Flag::Flagged => Some("flagged"),
        Flag::Answered => Some("answered"),
        Flag::Forwarded => Some("forwarded"),
        _ => None,
    }
}

fn flags_from_row(r: &Row<'_>, offset: usize) -> rusqlite::Result<Flags> {
    let mut flags = parse_flags(&r.get::<_, String>(offset + 5)?);
    for (i, flag) in [
        Flag::Deleted,
        Flag::Seen,
        Flag::Flagged,
        Flag::Answered,
        Flag::Forwarded,
    ]
    .into_iter()
    .enumerate()
    {
        if r.get::<_, i64>(offset + i)? != 0 {
            flags.insert(flag);
        }
    }
    Ok(flags)
}

fn download_state_from_db(value: &str) -> MessageDownloadState {
    match value {
        "full" => MessageDownloadState::Full,
        "partial" => MessageDownloadState::Partial,
        _ => MessageDownloadState::Envelope,
    }
}

impl MessageStore for SqliteMessageStore {
    fn create_folders(&self, folders: &[FolderInfo]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO folders (server_id, name, type, visible_limit)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(server_id) DO NOTHING
                "#,
            )?;
            for folder in folders {
                stmt.execute(params![
                    folder.server_id,
                    folder.name,
                    folder.folder_type.as_str(),
                    self.default_visible_limit
                ])?;
            }
        }
        tx.commit()?;
        debug!("created {} folder(s)", folders.len());
        Ok(())
    }

    fn create_local_folder(&self, server_id: &str, name: &str) -> Result<FolderId> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO folders (server_id, name, local_only, visible_limit)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(server_id) DO NOTHING
            "#,
            params![server_id, name, self.default_visible_limit],
        )?;
        let id = conn.query_row(
            "SELECT id FROM folders WHERE server_id = ?1",
            params![server_id],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    fn get_folders(&self) -> Result<Vec<FolderDetails>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders ORDER BY id"
        ))?;
        let folders = stmt
            .query_map([], folder_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }

    fn get_folder(&self, folder_id: FolderId) -> Result<Option<FolderDetails>> {
        let folder = self
            .conn()
            .query_row(
                &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?1"),
                params![folder_id],
                folder_from_row,
            )
            .optional()?;
        Ok(folder)
    }

    fn get_folder_by_server_id(&self, server_id: &str) -> Result<Option<FolderDetails>> {
        let folder = self
            .conn()
            .query_row(
                &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE server_id = ?1"),
                params![server_id],
                folder_from_row,
            )
            .optional()?;
        Ok(folder)
    }

    fn get_remote_folder_server_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT server_id FROM folders WHERE local_only = 0 ORDER BY id")?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn change_folder(&self, server_id: &str, name: &str, folder_type: FolderType) -> Result<()> {
        self.conn().execute(
            "UPDATE folders SET name = ?1, type = ?2 WHERE server_id = ?3",
            params![name, folder_type.as_str(), server_id],
        )?;
        Ok(())
    }

    fn delete_folders(&self, server_ids: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for server_id in server_ids {
            let folder_id: Option<FolderId> = tx
                .query_row(
                    "SELECT id FROM folders WHERE server_id = ?1",
                    params![server_id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(folder_id) = folder_id else {
                continue;
            };
            tx.execute("DELETE FROM messages WHERE folder_id = ?1", params![folder_id])?;
            tx.execute(
                "DELETE FROM folder_extra_values WHERE folder_id = ?1",
                params![folder_id],
            )?;
            tx.execute("DELETE FROM folders WHERE id = ?1", params![folder_id])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn set_visible_limit(&self, folder_id: FolderId, visible_limit: u32) -> Result<()> {
        self.set_folder_column(folder_id, "visible_limit", visible_limit)
    }

    fn get_more_messages(&self, folder_id: FolderId) -> Result<MoreMessages> {
        let value = self.folder_string(folder_id, "more_messages")?;
        Ok(MoreMessages::from_db_value(value.as_deref().unwrap_or("unknown")))
    }

    fn set_more_messages(&self, folder_id: FolderId, more_messages: MoreMessages) -> Result<()> {
        self.set_folder_column(folder_id, "more_messages", more_messages.as_db_value())
    }

    fn set_last_checked(&self, folder_id: FolderId, timestamp: i64) -> Result<()> {
        self.set_folder_column(folder_id, "last_updated", timestamp)
    }

    fn set_status(&self, folder_id: FolderId, status: Option<&str>) -> Result<()> {
        self.set_folder_column(folder_id, "status", status)
    }

    fn get_push_state(&self, folder_id: FolderId) -> Result<Option<String>> {
        self.folder_string(folder_id, "push_state")
    }

    fn set_push_state(&self, folder_id: FolderId, push_state: Option<&str>) -> Result<()> {
        self.set_folder_column(folder_id, "push_state", push_state)
    }

    fn get_folder_extra_string(&self, folder_id: FolderId, name: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value_text FROM folder_extra_values WHERE folder_id = ?1 AND name = ?2",
                params![folder_id, name],
                |r| r.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn set_folder_extra_string(
        &self,
        folder_id: FolderId,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO folder_extra_values (folder_id, name, value_text) VALUES (?1, ?2, ?3)
            ON CONFLICT(folder_id, name) DO UPDATE SET value_text = excluded.value_text
            "#,
            params![folder_id, name, value],
        )?;
        Ok(())
    }

    fn get_folder_extra_number(&self, folder_id: FolderId, name: &str) -> Result<Option<i64>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value_integer FROM folder_extra_values WHERE folder_id = ?1 AND name = ?2",
                params![folder_id, name],
                |r| r.get::<_, Option<i64>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn set_folder_extra_number(&self, folder_id: FolderId, name: &str, value: i64) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO folder_extra_values (folder_id, name, value_integer) VALUES (?1, ?2, ?3)
            ON CONFLICT(folder_id, name) DO UPDATE SET value_integer = excluded.value_integer
            "#,
            params![folder_id, name, value],
        )?;
        Ok(())
    }

    fn get_extra_string(&self, name: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value_text FROM account_extra_values WHERE name = ?1",
                params![name],
                |r| r.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn set_extra_string(&self, name: &str, value: &str) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO account_extra_values (name, value_text) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value_text = excluded.value_text
            "#,
            params![name, value],
        )?;
        Ok(())
    }

    fn get_extra_number(&self, name: &str) -> Result<Option<i64>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value_integer FROM account_extra_values WHERE name = ?1",
                params![name],
                |r| r.get::<_, Option<i64>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn set_extra_number(&self, name: &str, value: i64) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO account_extra_values (name, value_integer) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value_integer = excluded.value_integer
            "#,
            params![name, value],
        )?;
        Ok(())
    }

    fn get_message_server_ids(&self, folder_id: FolderId) -> Result<Vec<MessageServerId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT uid FROM messages WHERE folder_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![folder_id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn get_all_messages_and_dates(
        &self,
        folder_id: FolderId,
    ) -> Result<HashMap<MessageServerId, Option<i64>>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT uid, date FROM messages
            WHERE folder_id = ?1 AND deleted = 0
            ORDER BY date DESC
            "#,
        )?;
        let map = stmt
            .query_map(params![folder_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, Option<i64>>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(map)
    }

    fn get_messages(&self, folder_id: FolderId) -> Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT uid, subject, sender, date, preview, download_state,
                   deleted, read, flagged, answered, forwarded, flags
            FROM messages
            WHERE folder_id = ?1
            ORDER BY date DESC, id DESC
            "#,
        )?;
        let messages = stmt
            .query_map(params![folder_id], |r| {
                Ok(StoredMessage {
                    server_id: r.get(0)?,
                    subject: r.get(1)?,
                    sender: r.get(2)?,
                    date_epoch: r.get(3)?,
                    preview: r.get(4)?,
                    download_state: download_state_from_db(&r.get::<_, String>(5)?),
                    flags: flags_from_row(r, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn destroy_messages(&self, folder_id: FolderId, server_ids: &[MessageServerId]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM messages WHERE folder_id = ?1 AND uid = ?2")?;
            for uid in server_ids {
                stmt.execute(params![folder_id, uid])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear_all_messages(&self, folder_id: FolderId) -> Result<()> {
        self.conn()
            .execute("DELETE FROM messages WHERE folder_id = ?1", params![folder_id])?;
        Ok(())
    }

    fn is_message_present(&self, folder_id: FolderId, server_id: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM messages WHERE folder_id = ?1 AND uid = ?2",
                params![folder_id, server_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_message_flags(&self, folder_id: FolderId, server_id: &str) -> Result<Flags> {
        self.conn()
            .query_row(
                r#"
                SELECT deleted, read, flagged, answered, forwarded, flags
                FROM messages WHERE folder_id = ?1 AND uid = ?2
                "#,
                params![folder_id, server_id],
                |r| flags_from_row(r, 0),
            )
            .optional()?
            .ok_or_else(|| anyhow!("couldn't read flags for {folder_id}:{server_id}"))
    }

    fn set_message_flag(
        &self,
        folder_id: FolderId,
        server_id: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        let conn = self.conn();
        if let Some(column) = flag_column(flag) {
            conn.execute(
                &format!("UPDATE messages SET {column} = ?1 WHERE folder_id = ?2 AND uid = ?3"),
                params![value, folder_id, server_id],
            )?;
            return Ok(());
        }

        let current: Option<String> = conn
            .query_row(
                "SELECT flags FROM messages WHERE folder_id = ?1 AND uid = ?2",
                params![folder_id, server_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(());
        };

        let mut flags = parse_flags(&current);
        if value {
            flags.insert(flag);
        } else {
            flags.remove(&flag);
        }
        conn.execute(
            "UPDATE messages SET flags = ?1 WHERE folder_id = ?2 AND uid = ?3",
            params![join_flags(&flags), folder_id, server_id],
        )?;
        Ok(())
    }

    fn save_message(
        &self,
        folder_id: FolderId,
        message: &MessageData,
        state: MessageDownloadState,
    ) -> Result<()> {
        let mut other_flags: Flags = message
            .flags
            .iter()
            .copied()
            .filter(|f| flag_column(*f).is_none())
            .filter(|f| !matches!(f, Flag::DownloadedFull | Flag::DownloadedPartial))
            .collect();
        match state {
            MessageDownloadState::Full => {
                other_flags.insert(Flag::DownloadedFull);
            }
            MessageDownloadState::Partial => {
                other_flags.insert(Flag::DownloadedPartial);
            }
            MessageDownloadState::Envelope => {}
        }

        let has = |flag: Flag| message.flags.contains(&flag);
        self.conn().execute(
            r#"
            INSERT INTO messages (
                folder_id, uid, subject, sender, date, size,
                read, flagged, answered, forwarded, deleted, flags,
                preview, body, download_state
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(folder_id, uid) DO UPDATE SET
                subject = excluded.subject,
                sender = excluded.sender,
                date = excluded.date,
                size = excluded.size,
                read = excluded.read,
                flagged = excluded.flagged,
                answered = excluded.answered,
                forwarded = excluded.forwarded,
                deleted = excluded.deleted,
                flags = excluded.flags,
                preview = excluded.preview,
                body = excluded.body,
                download_state = excluded.download_state
            "#,
            params![
                folder_id,
                message.server_id,
                message.subject,
                message.sender,
                message.date_epoch,
                message.size as i64,
                has(Flag::Seen),
                has(Flag::Flagged),
                has(Flag::Answered),
                has(Flag::Forwarded),
                has(Flag::Deleted),
                join_flags(&other_flags),
                message.preview,
                message.body,
                state.as_str(),
            ],
        )?;
        Ok(())
    }

    fn get_oldest_message_date(&self, folder_id: FolderId) -> Result<Option<i64>> {
        let date = self.conn().query_row(
            "SELECT MIN(date) FROM messages WHERE folder_id = ?1 AND deleted = 0",
            params![folder_id],
            |r| r.get::<_, Option<i64>>(0),
        )?;
        Ok(date)
    }

    fn get_last_uid(&self, folder_id: FolderId) -> Result<Option<i64>> {
        let uid = self.conn().query_row(
            "SELECT MAX(CAST(uid AS INTEGER)) FROM messages WHERE folder_id = ?1",
            params![folder_id],
            |r| r.get::<_, Option<i64>>(0),
        )?;
        Ok(uid)
    }

    fn get_unread_message_count(&self, folder_id: FolderId) -> Result<u32> {
        let count = self.conn().query_row(
            "SELECT COUNT(id) FROM messages WHERE folder_id = ?1 AND deleted = 0 AND read = 0",
            params![folder_id],
            |r| r.get::<_, i64>(0),
        )?;
        Ok(count as u32)
    }
}

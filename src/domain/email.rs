use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Server-side message id (IMAP UID, POP3 UIDL, WebDAV href).
pub type MessageServerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    Deleted,
    Seen,
    Answered,
    Flagged,
    Draft,
    Recent,
    Forwarded,
    DownloadedFull,
    DownloadedPartial,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Deleted => "DELETED",
            Flag::Seen => "SEEN",
            Flag::Answered => "ANSWERED",
            Flag::Flagged => "FLAGGED",
            Flag::Draft => "DRAFT",
            Flag::Recent => "RECENT",
            Flag::Forwarded => "FORWARDED",
            Flag::DownloadedFull => "X_DOWNLOADED_FULL",
            Flag::DownloadedPartial => "X_DOWNLOADED_PARTIAL",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "DELETED" => Flag::Deleted,
            "SEEN" => Flag::Seen,
            "ANSWERED" => Flag::Answered,
            "FLAGGED" => Flag::Flagged,
            "DRAFT" => Flag::Draft,
            "RECENT" => Flag::Recent,
            "FORWARDED" => Flag::Forwarded,
            "X_DOWNLOADED_FULL" => Flag::DownloadedFull,
            "X_DOWNLOADED_PARTIAL" => Flag::DownloadedPartial,
            other => anyhow::bail!("unknown flag {other:?}"),
        })
    }
}

pub type Flags = BTreeSet<Flag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDownloadState {
    Envelope,
    Partial,
    Full,
}

impl MessageDownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDownloadState::Envelope => "envelope",
            MessageDownloadState::Partial => "partial",
            MessageDownloadState::Full => "full",
        }
    }
}

/// A message as handed from a protocol backend to local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    pub server_id: MessageServerId,
    pub subject: String,
    pub sender: String,
    pub date_epoch: i64,
    pub size: u64,
    pub flags: Flags,
    pub body: String,
    pub preview: String,
}

//! Exchange-style WebDAV mail backend over blocking `reqwest`.

use anyhow::{Result, bail};
use log::{debug, info};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::account::credentials::PasswordProvider;
use crate::backend::server_settings::{ConnectionSecurity, ServerSettings, decode_store_uri};
use crate::backend::storage::BackendStorage;
use crate::backend::sync::{self, RemoteFolder, RemoteMessage, SyncConfig, SyncListener};
use crate::backend::{Backend, BackendFactory, BackendResult};
use crate::domain::account::{Account, AccountId};
use crate::domain::email::{Flag, Flags, MessageData, MessageServerId};
use crate::domain::folder::{FolderInfo, FolderType};
use crate::mail::parse_message;
use crate::store::BackendStorageFactory;

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?');

const FOLDER_PROPS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <d:iscollection/>
  </d:prop>
</d:propfind>"#;

const MESSAGE_PROPS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:e="urn:schemas:httpmail:">
  <d:prop>
    <d:getcontentlength/>
    <d:iscollection/>
    <e:read/>
  </d:prop>
</d:propfind>"#;

/// One `<response>` of a multistatus document, props keyed by local name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DavResponse {
    pub href: String,
    pub props: HashMap<String, String>,
}

impl DavResponse {
    pub fn is_collection(&self) -> bool {
        self.props.contains_key("collection")
            || self.props.get("iscollection").map(String::as_str) == Some("1")
    }

    /// Last non-empty path segment of the href, still percent-encoded.
    pub fn last_segment(&self) -> &str {
        self.href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

pub fn parse_multistatus(xml: &str) -> Result<Vec<DavResponse>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut responses = Vec::new();
    let mut current: Option<DavResponse> = None;
    let mut in_prop = false;
    let mut element: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "response" => current = Some(DavResponse::default()),
                    "prop" => in_prop = true,
                    _ => element = Some(name),
                }
            }
            Event::Empty(e) => {
                if let (true, Some(response)) = (in_prop, current.as_mut()) {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    response.props.insert(name, String::new());
                }
            }
            Event::Text(t) => {
                if let (Some(response), Some(name)) = (current.as_mut(), element.as_ref()) {
                    let text = t.unescape()?.into_owned();
                    if in_prop {
                        response.props.insert(name.clone(), text);
                    } else if name == "href" {
                        response.href = text;
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"response" => responses.extend(current.take()),
                b"prop" => in_prop = false,
                _ => element = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(responses)
}

struct DavClient {
    http: Client,
    base: Url,
    username: String,
    password: String,
}

impl DavClient {
    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        self.http
            .request(method, url.clone())
            .basic_auth(&self.username, Some(&self.password))
    }

    fn propfind(&self, url: &Url, depth: &str, body: &'static str) -> Result<Vec<DavResponse>> {
        let response = self
            .request(Method::from_bytes(b"PROPFIND")?, url)
            .header("Depth", depth)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(body)
            .send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            bail!("PROPFIND {url} failed: {status}");
        }
        parse_multistatus(&text)
    }

    fn get(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .request(Method::GET, url)
            .header("Translate", "f")
            .send()?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }

    fn mark_read(&self, url: &Url, read: bool) -> Result<()> {
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<d:propertyupdate xmlns:d="DAV:" xmlns:e="urn:schemas:httpmail:">
  <d:set><d:prop><e:read>{}</e:read></d:prop></d:set>
</d:propertyupdate>"#,
            u8::from(read)
        );
        self.request(Method::from_bytes(b"PROPPATCH")?, url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(body)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn delete(&self, url: &Url) -> Result<()> {
        self.request(Method::DELETE, url).send()?.error_for_status()?;
        Ok(())
    }

    fn folder_url(&self, folder_server_id: &str) -> Result<Url> {
        let segment = utf8_percent_encode(folder_server_id, PATH_SEGMENT).to_string();
        Ok(self.base.join(&format!("{segment}/"))?)
    }
}

pub fn base_url(settings: &ServerSettings) -> Result<Url> {
    let scheme = match settings.security {
        ConnectionSecurity::None => "http",
        ConnectionSecurity::StartTls | ConnectionSecurity::SslTls => "https",
    };
    let path = settings.path_prefix.as_deref().unwrap_or("").trim_end_matches('/');
    let url = Url::parse(&format!(
        "{scheme}://{}:{}{path}/",
        settings.host, settings.port
    ))?;
    Ok(url)
}

pub struct WebDavBackendFactory {
    storage_factory: Arc<BackendStorageFactory>,
    passwords: Arc<dyn PasswordProvider>,
}

impl WebDavBackendFactory {
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

impl BackendFactory for WebDavBackendFactory {
    fn create_backend(&self, account: &Account) -> BackendResult<Arc<dyn Backend>> {
        let settings = decode_store_uri(&account.store_uri)?;
        let storage = self.storage_factory.create_backend_storage(account)?;
        Ok(Arc::new(WebDavBackend {
            account_id: account.uuid.clone(),
            settings,
            storage,
            passwords: self.passwords.clone(),
        }))
    }
}

pub struct WebDavBackend {
    account_id: AccountId,
    settings: ServerSettings,
    storage: Arc<dyn BackendStorage>,
    passwords: Arc<dyn PasswordProvider>,
}

impl WebDavBackend {
    fn client(&self) -> Result<DavClient> {
        let password = self
            .settings
            .resolve_password(&self.account_id, self.passwords.as_ref())?;
        Ok(DavClient {
            http: Client::builder().build()?,
            base: base_url(&self.settings)?,
            username: self.settings.username.clone(),
            password,
        })
    }
}

impl Backend for WebDavBackend {
    fn protocol(&self) -> &'static str {
        "webdav"
    }

    fn supports_flags(&self) -> bool {
        true
    }

    fn supports_expunge(&self) -> bool {
        false
    }

    fn supports_move(&self) -> bool {
        true
    }

    fn supports_trash_folder(&self) -> bool {
        true
    }

    fn refresh_folder_list(&self) -> BackendResult<()> {
        let client = self.client()?;
        let responses = client.propfind(&client.base, "1", FOLDER_PROPS)?;

        let folders: Vec<FolderInfo> = responses
            .iter()
            .filter(|r| r.is_collection())
            .filter_map(|r| {
                let name = r.props.get("displayname").filter(|n| !n.is_empty())?;
                let folder_type = if name.eq_ignore_ascii_case("Inbox") {
                    FolderType::Inbox
                } else {
                    FolderType::Regular
                };
                Some(FolderInfo::new(name, name, folder_type))
            })
            .collect();

        info!("WebDAV server lists {} folder(s)", folders.len());
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
                let client = self.client()?;
                let folder_url = client.folder_url(folder_server_id)?;
                Ok(Box::new(WebDavRemoteFolder { client, folder_url }) as Box<dyn RemoteFolder>)
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
        if flag != Flag::Seen {
            debug!("WebDAV keeps flag {flag} locally");
            return Ok(());
        }
        let client = self.client()?;
        let folder_url = client.folder_url(folder_server_id)?;
        for id in message_server_ids {
            client.mark_read(&folder_url.join(id).map_err(anyhow::Error::from)?, value)?;
        }
        Ok(())
    }

    fn delete_messages(
        &self,
        folder_server_id: &str,
        message_server_ids: &[MessageServerId],
    ) -> BackendResult<()> {
        let client = self.client()?;
        let folder_url = client.folder_url(folder_server_id)?;
        for id in message_server_ids {
            client.delete(&folder_url.join(id).map_err(anyhow::Error::from)?)?;
        }
        Ok(())
    }

    fn check_incoming_server_settings(&self) -> BackendResult<()> {
        let client = self.client()?;
        client.propfind(&client.base, "0", FOLDER_PROPS)?;
        Ok(())
    }
}

struct WebDavRemoteFolder {
    client: DavClient,
    folder_url: Url,
}

impl RemoteFolder for WebDavRemoteFolder {
    fn list_messages(&mut self, _config: &SyncConfig) -> Result<Vec<RemoteMessage>> {
        let responses = self.client.propfind(&self.folder_url, "1", MESSAGE_PROPS)?;
        Ok(messages_from_listing(&responses))
    }

    fn fetch_message(&mut self, message: &RemoteMessage, full: bool) -> Result<MessageData> {
        let url = self.folder_url.join(&message.server_id)?;
        let raw = self.client.get(&url)?;
        // no ranged fetch; a partial download keeps the header block only
        let raw = if full { raw } else { header_block(&raw).to_vec() };
        Ok(parse_message(
            &message.server_id,
            &raw,
            message.flags.clone(),
            message.size,
        ))
    }
}

fn messages_from_listing(responses: &[DavResponse]) -> Vec<RemoteMessage> {
    let mut messages: Vec<RemoteMessage> = responses
        .iter()
        .filter(|r| !r.is_collection() && !r.last_segment().is_empty())
        .map(|r| {
            let mut flags = Flags::new();
            if r.props.get("read").map(String::as_str) == Some("1") {
                flags.insert(Flag::Seen);
            }
            RemoteMessage {
                server_id: r.last_segment().to_string(),
                size: r
                    .props
                    .get("getcontentlength")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                flags,
            }
        })
        .collect();
    // servers list in no particular order
    messages.sort_by(|a, b| a.server_id.cmp(&b.server_id));
    messages
}

fn header_block(raw: &[u8]) -> &[u8] {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| &raw[..i + 4])
        .unwrap_or(raw)
}

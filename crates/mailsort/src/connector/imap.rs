//! IMAP connector over implicit TLS, with password or XOAUTH2 login.

use std::collections::{HashMap, HashSet};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::{debug, info, warn};

use super::credentials::Credentials;
use super::error::{ConnectorError, Result};
use super::oauth::{ensure_fresh_token, OAuth2Provider, TokenRefresher};
use super::parser::parse_message;
use super::state::{ConnectorState, StateMachine};
use super::{newest_after, ConnectorOptions, MailConnector};
use crate::model::FetchedMessage;

type AsyncTcpStream = async_io::Async<TcpStream>;
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FOLDER: &str = "INBOX";

struct XOAuth2Authenticator {
    response: String,
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _data: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

#[derive(Clone)]
enum Login {
    Password { username: String, password: String },
    XOAuth2 { username: String, token: String },
}

async fn open_session(host: String, port: u16, login: Login) -> Result<Session<TlsStream>> {
    let addr = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| ConnectorError::Network(format!("Failed to resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| ConnectorError::Network(format!("No address for {}", host)))?;

    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, AsyncTcpStream::connect(addr))
        .await
        .map_err(|_| ConnectorError::Timeout(format!("connecting to {}:{}", host, port)))?
        .map_err(|e| ConnectorError::Network(e.to_string()))?;
    let tls = TlsConnector::new().connect(host.as_str(), tcp).await?;
    let client = async_imap::Client::new(tls);

    let session = match login {
        Login::Password { username, password } => client
            .login(&username, &password)
            .await
            .map_err(|(e, _)| ConnectorError::Auth(e.to_string()))?,
        Login::XOAuth2 { username, token } => {
            let response = format!("user={}\x01auth=Bearer {}\x01\x01", username, token);
            client
                .authenticate("XOAUTH2", XOAuth2Authenticator { response })
                .await
                .map_err(|(e, _)| ConnectorError::Auth(e.to_string()))?
        }
    };
    info!("Authenticated to IMAP server {}", host);
    Ok(session)
}

/// Server extensions the connector makes use of.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Extensions {
    uid_move: bool,
    /// UIDPLUS, which scopes EXPUNGE to the given UIDs.
    uid_expunge: bool,
}

impl Extensions {
    fn detect(has: impl Fn(&str) -> bool) -> Self {
        Self {
            uid_move: has("MOVE"),
            uid_expunge: has("UIDPLUS"),
        }
    }
}

/// IMAP-backed [`MailConnector`]. Message ids are UIDs within the synced folder.
pub struct ImapConnector {
    credentials: Credentials,
    refresher: Arc<dyn TokenRefresher>,
    options: ConnectorOptions,
    state: StateMachine,
    session: Option<Session<TlsStream>>,
    selected: Option<String>,
    /// Folder of the last fetch; actions look messages up there.
    source_folder: Option<String>,
    extensions: Extensions,
    credentials_changed: bool,
}

impl ImapConnector {
    pub fn new(
        credentials: Credentials,
        refresher: Arc<dyn TokenRefresher>,
        options: ConnectorOptions,
    ) -> Self {
        Self {
            credentials,
            refresher,
            options,
            state: StateMachine::default(),
            session: None,
            selected: None,
            source_folder: None,
            extensions: Extensions::default(),
            credentials_changed: false,
        }
    }

    fn endpoint_and_login(&self) -> Result<(String, u16, Login)> {
        match &self.credentials {
            Credentials::Password(p) => Ok((
                p.host.clone(),
                p.port,
                Login::Password {
                    username: p.username.clone(),
                    password: p.password.clone(),
                },
            )),
            Credentials::OAuth2(o) => {
                let (host, port) = o.imap_endpoint()?;
                Ok((
                    host,
                    port,
                    Login::XOAuth2 {
                        username: o.username.clone(),
                        token: o.access_token.clone(),
                    },
                ))
            }
        }
    }

    fn trash_folder(&self) -> String {
        let (configured, provider) = match &self.credentials {
            Credentials::Password(p) => (p.trash_folder.clone(), None),
            Credentials::OAuth2(o) => (o.trash_folder.clone(), Some(o.provider)),
        };
        configured.unwrap_or_else(|| match provider {
            Some(OAuth2Provider::Gmail) => "[Gmail]/Trash".to_string(),
            Some(OAuth2Provider::Outlook) => "Deleted Items".to_string(),
            _ => "Trash".to_string(),
        })
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.state.ensure_usable()?;
        if !self.state.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.session.as_mut().ok_or(ConnectorError::NotConnected)
    }

    async fn select(&mut self, folder: &str) -> Result<()> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        let session = self.session()?;
        session.select(folder).await.map_err(|e| match e {
            async_imap::error::Error::No(_) => ConnectorError::FolderNotFound(folder.to_string()),
            other => other.into(),
        })?;
        debug!("Selected folder {}", folder);
        self.selected = Some(folder.to_string());
        Ok(())
    }

    /// Selects the source folder (last synced, else INBOX) and checks `uid`
    /// is still present there.
    async fn locate(&mut self, message_id: &str) -> Result<Option<u32>> {
        let Ok(uid) = message_id.parse::<u32>() else {
            warn!("Ignoring malformed IMAP message id '{}'", message_id);
            return Ok(None);
        };
        let folder = self
            .source_folder
            .clone()
            .unwrap_or_else(|| DEFAULT_FOLDER.to_string());
        self.select(&folder).await?;

        let found = self
            .session()?
            .uid_search(format!("UID {} NOT DELETED", uid))
            .await?;
        Ok(found.contains(&uid).then_some(uid))
    }

    async fn copy_creating(&mut self, uid: u32, folder: &str) -> Result<()> {
        let session = self.session()?;
        match session.uid_copy(uid.to_string(), folder).await {
            Err(async_imap::error::Error::No(msg)) if msg.contains("TRYCREATE") => {
                info!("Creating missing folder {}", folder);
                session.create(folder).await?;
                session.uid_copy(uid.to_string(), folder).await?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Flags `uid` deleted and expunges only that UID. Without UIDPLUS the
    /// flag stays for the next expunge, since a plain EXPUNGE would also
    /// remove messages other clients flagged.
    async fn expunge_uid(&mut self, uid: u32) -> Result<()> {
        let uid_expunge = self.extensions.uid_expunge;
        let session = self.session()?;
        session
            .uid_store(uid.to_string(), "+FLAGS.SILENT (\\Deleted)")
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        if uid_expunge {
            session
                .uid_expunge(uid.to_string())
                .await?
                .try_collect::<Vec<_>>()
                .await?;
        } else {
            debug!("Server lacks UIDPLUS, leaving UID {} flagged \\Deleted", uid);
        }
        Ok(())
    }

    async fn move_uid(&mut self, uid: u32, folder: &str) -> Result<()> {
        if self.extensions.uid_move {
            let session = self.session()?;
            match session.uid_mv(uid.to_string(), folder).await {
                Err(async_imap::error::Error::No(msg)) if msg.contains("TRYCREATE") => {
                    info!("Creating missing folder {}", folder);
                    session.create(folder).await?;
                    session.uid_mv(uid.to_string(), folder).await?;
                }
                other => other?,
            }
            return Ok(());
        }
        self.copy_creating(uid, folder).await?;
        self.expunge_uid(uid).await
    }

    fn fail_connect(&mut self, err: ConnectorError) -> ConnectorError {
        let next = if err.is_auth() {
            ConnectorState::AuthFailed
        } else {
            ConnectorState::Disconnected
        };
        if self.state.current() != ConnectorState::AuthFailed
            && self.state.current() != ConnectorState::Disconnected
        {
            if let Err(e) = self.state.transition(next) {
                warn!("{}", e);
            }
        }
        err
    }

    /// Decides whether a failed `attempt` is retried. A transient failure
    /// leaves the session unusable, so it is dropped and reopened after the
    /// backoff. Returns the error when the operation should give up.
    async fn recover(&mut self, operation: &str, attempt: u32, err: ConnectorError) -> Result<()> {
        let Some(delay) = self.options.retry.next_delay(attempt, &err) else {
            return Err(err);
        };
        warn!(
            "{} failed (attempt {}/{}): {}; reconnecting in {:?}",
            operation, attempt, self.options.retry.max_attempts, err, delay
        );
        self.session = None;
        self.selected = None;
        if self.state.is_connected() {
            self.state.transition(ConnectorState::Disconnected)?;
        }
        tokio::time::sleep(delay).await;
        self.connect().await
    }

    async fn fetch_once(
        &mut self,
        folder: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchedMessage>> {
        self.select(folder).await?;
        self.source_folder = Some(folder.to_string());
        let preview_chars = self.options.preview_chars;
        let session = self.session()?;

        let uids: HashSet<u32> = session.uid_search(search_query(since)).await?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let dates = session
            .uid_fetch(join_uids(uids.iter().copied()), "(UID INTERNALDATE)")
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        let listed = internal_dates(&uids, dates.iter().map(FetchedPart::from).collect())?;
        let candidates = newest_after(listed, since, limit, |(_, received)| *received);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let bodies = session
            .uid_fetch(
                join_uids(candidates.iter().map(|(uid, _)| *uid)),
                "(UID INTERNALDATE BODY.PEEK[])",
            )
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        let messages = assemble_messages(
            &candidates,
            bodies.iter().map(FetchedPart::from).collect(),
            preview_chars,
        )?;
        debug!("Fetched {} messages from {}", messages.len(), folder);
        Ok(messages)
    }

    async fn move_once(&mut self, message_id: &str, folder: &str) -> Result<bool> {
        let Some(uid) = self.locate(message_id).await? else {
            return Ok(false);
        };
        self.move_uid(uid, folder).await?;
        Ok(true)
    }

    async fn delete_once(&mut self, message_id: &str, permanent: bool) -> Result<bool> {
        let Some(uid) = self.locate(message_id).await? else {
            return Ok(false);
        };
        if permanent {
            self.expunge_uid(uid).await?;
        } else {
            let trash = self.trash_folder();
            self.move_uid(uid, &trash).await?;
        }
        Ok(true)
    }

    async fn label_once(&mut self, message_id: &str, label: &str) -> Result<bool> {
        let Some(uid) = self.locate(message_id).await? else {
            return Ok(false);
        };
        self.copy_creating(uid, label).await?;
        Ok(true)
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    fn state(&self) -> ConnectorState {
        self.state.current()
    }

    async fn connect(&mut self) -> Result<()> {
        self.state.ensure_usable()?;
        if self.state.is_connected() {
            return Ok(());
        }
        self.state.transition(ConnectorState::Connecting)?;

        if let Credentials::OAuth2(oauth) = &mut self.credentials {
            let refreshed = ensure_fresh_token(
                oauth,
                self.refresher.as_ref(),
                &self.options.retry,
                self.options.refresh_margin,
                &mut self.state,
            )
            .await?;
            self.credentials_changed |= refreshed;
        }

        let (host, port, login) = match self.endpoint_and_login() {
            Ok(parts) => parts,
            Err(e) => return Err(self.fail_connect(e)),
        };
        let opened = self
            .options
            .retry
            .execute("imap connect", || {
                open_session(host.clone(), port, login.clone())
            })
            .await;
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => return Err(self.fail_connect(e)),
        };

        self.extensions = match session.capabilities().await {
            Ok(caps) => Extensions::detect(|name| caps.has_str(name)),
            Err(e) => {
                warn!("CAPABILITY failed, assuming no MOVE or UIDPLUS: {}", e);
                Extensions::default()
            }
        };
        self.session = Some(session);
        self.state.transition(ConnectorState::Connected)?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout().await {
                debug!("IMAP logout failed: {}", e);
            }
        }
        self.selected = None;
        if self.state.is_connected() {
            self.state.transition(ConnectorState::Disconnected)?;
        }
        Ok(())
    }

    async fn fetch_messages(
        &mut self,
        folder: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchedMessage>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(folder, limit, since).await {
                Ok(messages) => return Ok(messages),
                Err(e) => self.recover("imap fetch", attempt, e).await?,
            }
        }
    }

    async fn move_message(&mut self, message_id: &str, folder: &str) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.move_once(message_id, folder).await {
                Ok(moved) => return Ok(moved),
                Err(e) => self.recover("imap move", attempt, e).await?,
            }
        }
    }

    async fn delete_message(&mut self, message_id: &str, permanent: bool) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.delete_once(message_id, permanent).await {
                Ok(deleted) => return Ok(deleted),
                Err(e) => self.recover("imap delete", attempt, e).await?,
            }
        }
    }

    async fn apply_label(&mut self, message_id: &str, label: &str) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.label_once(message_id, label).await {
                Ok(labelled) => return Ok(labelled),
                Err(e) => self.recover("imap label", attempt, e).await?,
            }
        }
    }

    fn refreshed_credentials(&self) -> Option<Credentials> {
        self.credentials_changed.then(|| self.credentials.clone())
    }
}

impl Drop for ImapConnector {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapConnector dropped without explicit disconnect");
        }
    }
}

fn join_uids(uids: impl Iterator<Item = u32>) -> String {
    uids.map(|u| u.to_string()).collect::<Vec<_>>().join(",")
}

/// SEARCH criteria for messages after `since`. SINCE compares dates in the
/// server's timezone, so the search starts a day early and the exact cut is
/// made on INTERNALDATE afterwards.
fn search_query(since: Option<DateTime<Utc>>) -> String {
    match since {
        Some(t) => format!(
            "NOT DELETED SINCE {}",
            (t - chrono::Duration::days(1)).format("%d-%b-%Y")
        ),
        None => "NOT DELETED".to_string(),
    }
}

/// The fields of one FETCH reply the connector reads.
#[derive(Debug, Default)]
struct FetchedPart<'a> {
    uid: Option<u32>,
    internal_date: Option<DateTime<Utc>>,
    body: Option<&'a [u8]>,
}

impl<'a> From<&'a async_imap::types::Fetch> for FetchedPart<'a> {
    fn from(fetch: &'a async_imap::types::Fetch) -> Self {
        Self {
            uid: fetch.uid,
            internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            body: fetch.body(),
        }
    }
}

/// Replies without a UID are unsolicited updates and are ignored.
fn by_uid(parts: Vec<FetchedPart<'_>>) -> HashMap<u32, FetchedPart<'_>> {
    parts
        .into_iter()
        .filter_map(|part| Some((part.uid?, part)))
        .collect()
}

/// Pairs every searched UID with its INTERNALDATE. A UID the server did not
/// date fails the fetch rather than vanishing from the result.
fn internal_dates(
    uids: &HashSet<u32>,
    replies: Vec<FetchedPart<'_>>,
) -> Result<Vec<(u32, DateTime<Utc>)>> {
    let replies = by_uid(replies);
    uids.iter()
        .map(|&uid| {
            replies
                .get(&uid)
                .and_then(|part| part.internal_date)
                .map(|date| (uid, date))
                .ok_or_else(|| {
                    ConnectorError::Protocol(format!("FETCH returned no INTERNALDATE for UID {}", uid))
                })
        })
        .collect()
}

/// Parses the body of every candidate, keeping candidate order. Any missing
/// or unparsable body fails the whole fetch.
fn assemble_messages(
    candidates: &[(u32, DateTime<Utc>)],
    replies: Vec<FetchedPart<'_>>,
    preview_chars: usize,
) -> Result<Vec<FetchedMessage>> {
    let replies = by_uid(replies);
    candidates
        .iter()
        .map(|&(uid, received)| {
            let raw = replies
                .get(&uid)
                .and_then(|part| part.body)
                .ok_or_else(|| ConnectorError::Protocol(format!("FETCH returned no body for UID {}", uid)))?;
            parse_message(raw, &uid.to_string(), Some(received), preview_chars)
        })
        .collect()
}

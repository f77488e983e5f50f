//! REST mail connector for the Microsoft Graph v1.0 API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use moka::future::Cache;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use super::credentials::{Credentials, OAuth2Credentials};
use super::error::{ConnectorError, Result};
use super::oauth::{ensure_fresh_token, TokenRefresher};
use super::parser::preview;
use super::state::{ConnectorState, StateMachine};
use super::{newest_after, ConnectorOptions, MailConnector};
use crate::model::FetchedMessage;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

const FOLDER_CACHE_TTL: Duration = Duration::from_secs(600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_PAGE_SIZE: usize = 1000;
const MESSAGE_FIELDS: &str = "id,subject,from,receivedDateTime,body,bodyPreview,hasAttachments";

/// Maps IMAP-style folder names onto Graph well-known folder names.
pub fn well_known_folder(name: &str) -> Option<&'static str> {
    match name.to_ascii_uppercase().as_str() {
        "INBOX" => Some("inbox"),
        "SENT" => Some("sentitems"),
        "DRAFTS" => Some("drafts"),
        "TRASH" => Some("deleteditems"),
        "JUNK" => Some("junkemail"),
        _ => None,
    }
}

/// Quotes a literal for an OData `$filter` expression.
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<Recipient>,
    received_date_time: DateTime<Utc>,
    #[serde(default)]
    body: Option<ItemBody>,
    #[serde(default)]
    body_preview: Option<String>,
    #[serde(default)]
    has_attachments: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AttachmentName {
    #[serde(default)]
    name: Option<String>,
}

impl GraphMessage {
    fn into_fetched(self, preview_chars: usize) -> FetchedMessage {
        let sender = self
            .from
            .map(|r| match (r.email_address.name, r.email_address.address) {
                (Some(name), Some(addr)) => format!("{} <{}>", name, addr),
                (None, Some(addr)) => addr,
                (Some(name), None) => name,
                (None, None) => String::new(),
            })
            .unwrap_or_default();
        let text = self
            .body
            .map(|b| b.content)
            .or(self.body_preview)
            .unwrap_or_default();
        FetchedMessage {
            provider_id: self.id,
            subject: self.subject.unwrap_or_default(),
            sender,
            received_at: self.received_date_time,
            body_preview: preview(&text, preview_chars),
            attachment_names: Vec::new(),
            has_attachments: self.has_attachments,
        }
    }
}

fn parse_page(page: Value) -> Result<MessagePage> {
    serde_json::from_value(page).map_err(|e| ConnectorError::Protocol(format!("message page: {}", e)))
}

fn parse_listing<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Result<Vec<T>> {
    serde_json::from_value::<Listing<T>>(value)
        .map(|l| l.value)
        .map_err(|e| ConnectorError::Protocol(format!("{}: {}", what, e)))
}

/// One HTTP exchange. `Ok(None)` means 404.
async fn send_once(
    http: &Client,
    method: Method,
    url: &Url,
    token: &str,
    body: Option<&Value>,
) -> Result<Option<Value>> {
    let mut request = http
        .request(method, url.clone())
        .bearer_auth(token)
        .header("Prefer", HeaderValue::from_static("outlook.body-content-type=\"text\""));
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request.send().await?;
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        return Err(ConnectorError::from_status(status.as_u16(), &text, retry_after));
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Some(Value::Null));
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Some(Value::Null));
    }
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ConnectorError::Protocol(format!("invalid JSON from provider: {}", e)))
}

/// Graph-backed [`MailConnector`]. Message ids are Graph message ids.
pub struct GraphConnector {
    http: Client,
    base_url: String,
    credentials: OAuth2Credentials,
    refresher: Arc<dyn TokenRefresher>,
    options: ConnectorOptions,
    state: StateMachine,
    folder_ids: Cache<String, String>,
    credentials_changed: bool,
}

impl GraphConnector {
    pub fn new(
        credentials: OAuth2Credentials,
        refresher: Arc<dyn TokenRefresher>,
        options: ConnectorOptions,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConnectorError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            refresher,
            options,
            state: StateMachine::default(),
            folder_ids: Cache::builder()
                .max_capacity(1024)
                .time_to_live(FOLDER_CACHE_TTL)
                .build(),
            credentials_changed: false,
        })
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let raw = format!("{}{}", self.base_url, path);
        if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        }
        .map_err(|e| ConnectorError::Protocol(format!("bad URL {}: {}", raw, e)))
    }

    /// Refreshes the access token mid-session when it is close to expiry.
    async fn ensure_token(&mut self) -> Result<()> {
        self.state.ensure_usable()?;
        if !self.state.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        let refreshed = ensure_fresh_token(
            &mut self.credentials,
            self.refresher.as_ref(),
            &self.options.retry,
            self.options.refresh_margin,
            &mut self.state,
        )
        .await?;
        if refreshed {
            self.credentials_changed = true;
            self.state.transition(ConnectorState::Connected)?;
        }
        Ok(())
    }

    async fn call(&mut self, method: Method, url: Url, body: Option<Value>) -> Result<Option<Value>> {
        self.ensure_token().await?;
        let http = &self.http;
        let token = self.credentials.access_token.as_str();
        let url = &url;
        let body = body.as_ref();
        let label = format!("{} {}", method, url.path());
        self.options
            .retry
            .execute(&label, move || send_once(http, method.clone(), url, token, body))
            .await
    }

    /// Resolves a folder name or `/`-separated path to a Graph folder id.
    async fn resolve_folder(&mut self, name: &str, create: bool) -> Result<String> {
        if let Some(alias) = well_known_folder(name) {
            return Ok(alias.to_string());
        }
        if let Some(id) = self.folder_ids.get(name).await {
            return Ok(id);
        }

        let mut parent: Option<String> = None;
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            let collection = match &parent {
                Some(id) => format!("/me/mailFolders/{}/childFolders", id),
                None => "/me/mailFolders".to_string(),
            };
            let url = self.url(
                &collection,
                &[("$filter", format!("displayName eq {}", odata_literal(segment)))],
            )?;
            let listing = self.call(Method::GET, url, None).await?.unwrap_or(Value::Null);
            let found = parse_listing::<FolderEntry>(listing, "folder listing")?
                .into_iter()
                .next()
                .map(|f| f.id);

            let id = match found {
                Some(id) => id,
                None if create => {
                    info!("Creating mail folder {}", segment);
                    let url = self.url(&collection, &[])?;
                    let created = self
                        .call(Method::POST, url, Some(json!({ "displayName": segment })))
                        .await?
                        .ok_or_else(|| ConnectorError::FolderNotFound(name.to_string()))?;
                    serde_json::from_value::<FolderEntry>(created)
                        .map_err(|e| ConnectorError::Protocol(e.to_string()))?
                        .id
                }
                None => return Err(ConnectorError::FolderNotFound(name.to_string())),
            };
            parent = Some(id);
        }

        let id = parent.ok_or_else(|| ConnectorError::FolderNotFound(name.to_string()))?;
        self.folder_ids.insert(name.to_string(), id.clone()).await;
        Ok(id)
    }

    async fn attachment_names(&mut self, message_id: &str) -> Result<Vec<String>> {
        let url = self.url(
            &format!("/me/messages/{}/attachments", message_id),
            &[("$select", "name".to_string())],
        )?;
        let listing = self.call(Method::GET, url, None).await?.unwrap_or(Value::Null);
        Ok(parse_listing::<AttachmentName>(listing, "attachment listing")?
            .into_iter()
            .filter_map(|a| a.name)
            .collect())
    }

    async fn move_to(&mut self, message_id: &str, folder_id: &str) -> Result<bool> {
        let url = self.url(&format!("/me/messages/{}/move", message_id), &[])?;
        let moved = self
            .call(Method::POST, url, Some(json!({ "destinationId": folder_id })))
            .await?;
        Ok(moved.is_some())
    }
}

#[async_trait]
impl MailConnector for GraphConnector {
    fn state(&self) -> ConnectorState {
        self.state.current()
    }

    async fn connect(&mut self) -> Result<()> {
        self.state.ensure_usable()?;
        if self.state.is_connected() {
            return Ok(());
        }
        self.state.transition(ConnectorState::Connecting)?;
        let refreshed = ensure_fresh_token(
            &mut self.credentials,
            self.refresher.as_ref(),
            &self.options.retry,
            self.options.refresh_margin,
            &mut self.state,
        )
        .await?;
        self.credentials_changed |= refreshed;
        self.state.transition(ConnectorState::Connected)?;
        debug!("Graph connector ready for {}", self.credentials.username);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
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
        self.ensure_token().await?;
        let folder_id = self.resolve_folder(folder, false).await?;

        let mut params = vec![
            ("$top", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$select", MESSAGE_FIELDS.to_string()),
        ];
        if let Some(since) = since {
            params.push((
                "$filter",
                format!(
                    "receivedDateTime gt {}",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ));
        }

        let mut next = Some(self.url(&format!("/me/mailFolders/{}/messages", folder_id), &params)?);
        let mut messages = Vec::new();
        while let Some(url) = next.take() {
            if messages.len() >= limit {
                break;
            }
            let page = self
                .call(Method::GET, url, None)
                .await?
                .ok_or_else(|| ConnectorError::FolderNotFound(folder.to_string()))?;
            let page = parse_page(page)?;
            messages.extend(
                page.value
                    .into_iter()
                    .map(|m| m.into_fetched(self.options.preview_chars)),
            );
            next = page
                .next_link
                .map(|link| {
                    Url::parse(&link).map_err(|e| ConnectorError::Protocol(e.to_string()))
                })
                .transpose()?;
        }
        let mut messages = newest_after(messages, since, limit, |m| m.received_at);

        for message in messages.iter_mut().filter(|m| m.has_attachments) {
            message.attachment_names = self.attachment_names(&message.provider_id).await?;
        }
        debug!("Fetched {} messages from {}", messages.len(), folder);
        Ok(messages)
    }

    async fn move_message(&mut self, message_id: &str, folder: &str) -> Result<bool> {
        self.ensure_token().await?;
        let folder_id = self.resolve_folder(folder, true).await?;
        self.move_to(message_id, &folder_id).await
    }

    async fn delete_message(&mut self, message_id: &str, permanent: bool) -> Result<bool> {
        if !permanent {
            return self.move_to(message_id, "deleteditems").await;
        }
        let url = self.url(&format!("/me/messages/{}", message_id), &[])?;
        Ok(self.call(Method::DELETE, url, None).await?.is_some())
    }

    async fn apply_label(&mut self, message_id: &str, label: &str) -> Result<bool> {
        let url = self.url(
            &format!("/me/messages/{}", message_id),
            &[("$select", "categories".to_string())],
        )?;
        let Some(current) = self.call(Method::GET, url, None).await? else {
            return Ok(false);
        };
        let mut categories: Vec<String> = current
            .get("categories")
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();
        if categories.iter().any(|c| c == label) {
            return Ok(true);
        }
        categories.push(label.to_string());

        let url = self.url(&format!("/me/messages/{}", message_id), &[])?;
        let patched = self
            .call(Method::PATCH, url, Some(json!({ "categories": categories })))
            .await?;
        Ok(patched.is_some())
    }

    fn refreshed_credentials(&self) -> Option<Credentials> {
        self.credentials_changed
            .then(|| Credentials::OAuth2(self.credentials.clone()))
    }
}

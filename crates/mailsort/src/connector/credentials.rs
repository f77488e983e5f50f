//! Provider credential payloads as stored (sealed) on an account.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::ConnectorError;
use super::oauth::{OAuth2Provider, TokenResponse};
use crate::secrets::{CredentialVault, SecretError};

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

fn default_imap_port() -> u16 {
    DEFAULT_IMAP_PORT
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    Password(PasswordCredentials),
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Credentials),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordCredentials {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub trash_folder: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Credentials {
    pub provider: OAuth2Provider,
    pub username: String,
    /// IMAP host; defaults per provider.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Overrides the provider's token endpoint (required for `custom`).
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub trash_folder: Option<String>,
}

impl Credentials {
    pub fn username(&self) -> &str {
        match self {
            Credentials::Password(p) => &p.username,
            Credentials::OAuth2(o) => &o.username,
        }
    }

    /// Serializes and seals into an opaque blob.
    pub fn seal(&self, vault: &CredentialVault) -> Result<String, SecretError> {
        let json = serde_json::to_vec(self).map_err(|e| SecretError::Encoding(e.to_string()))?;
        vault.seal(&json)
    }

    pub fn open(blob: &str, vault: &CredentialVault) -> Result<Self, SecretError> {
        let json = vault.open(blob)?;
        serde_json::from_slice(&json).map_err(|e| SecretError::Encoding(e.to_string()))
    }
}

impl OAuth2Credentials {
    /// True once the access token is within `margin` of expiring.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at <= now + margin
    }

    /// Applies a token endpoint response. Keeps the old refresh token when none is returned.
    pub fn apply_token(&mut self, token: &TokenResponse, now: DateTime<Utc>) {
        self.access_token = token.access_token.clone();
        if let Some(refresh) = &token.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
        let lifetime = token
            .expires_in
            .and_then(|s| i64::try_from(s).ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        self.expires_at = now + Duration::seconds(lifetime);
    }

    pub fn imap_endpoint(&self) -> Result<(String, u16), ConnectorError> {
        let host = self
            .host
            .clone()
            .or_else(|| self.provider.imap_host().map(str::to_string))
            .ok_or_else(|| {
                ConnectorError::Credentials("IMAP host required for custom provider".into())
            })?;
        Ok((host, self.port.unwrap_or(DEFAULT_IMAP_PORT)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(p) => p.fmt(f),
            Credentials::OAuth2(o) => o.fmt(f),
        }
    }
}

impl fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for OAuth2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Credentials")
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

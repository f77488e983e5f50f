//! OAuth2 token endpoints: refresh for running connectors, device flow for enrollment.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::credentials::OAuth2Credentials;
use super::error::{truncate_body, ConnectorError, Result};
use super::retry::RetryPolicy;
use super::state::{ConnectorState, StateMachine};
use crate::model::ProviderKind;

/// Identity provider an OAuth2 account authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuth2Provider {
    Gmail,
    Outlook,
    Custom,
}

impl OAuth2Provider {
    pub fn token_url(&self, tenant: &str) -> Option<String> {
        match self {
            OAuth2Provider::Gmail => Some("https://oauth2.googleapis.com/token".to_string()),
            OAuth2Provider::Outlook => Some(format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                tenant
            )),
            OAuth2Provider::Custom => None,
        }
    }

    pub fn device_auth_url(&self, tenant: &str) -> Option<String> {
        match self {
            OAuth2Provider::Gmail => Some("https://oauth2.googleapis.com/device/code".to_string()),
            OAuth2Provider::Outlook => Some(format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/devicecode",
                tenant
            )),
            OAuth2Provider::Custom => None,
        }
    }

    /// Scopes needed for the given access path. Outlook needs `offline_access`
    /// to be issued a refresh token at all.
    pub fn scopes(&self, kind: ProviderKind) -> &'static [&'static str] {
        match (self, kind) {
            (OAuth2Provider::Gmail, _) => &["https://mail.google.com/"],
            (OAuth2Provider::Outlook, ProviderKind::OAuth2Rest) => &[
                "https://graph.microsoft.com/Mail.ReadWrite",
                "offline_access",
            ],
            (OAuth2Provider::Outlook, _) => &[
                "https://outlook.office.com/IMAP.AccessAsUser.All",
                "offline_access",
            ],
            (OAuth2Provider::Custom, _) => &[],
        }
    }

    /// Default IMAP host for providers that expose one.
    pub fn imap_host(&self) -> Option<&'static str> {
        match self {
            OAuth2Provider::Gmail => Some("imap.gmail.com"),
            OAuth2Provider::Outlook => Some("outlook.office365.com"),
            OAuth2Provider::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Absent when the provider keeps the existing refresh token valid.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credentials: &OAuth2Credentials) -> Result<TokenResponse>;
}

/// Refreshes `credentials` when they are within `margin` of expiry, walking
/// the state machine through TOKEN_EXPIRING and REFRESHING.
///
/// Returns `true` when a new token was applied; the caller then moves the
/// machine on to CONNECTED. An auth-class refusal lands in AUTH_FAILED; a
/// transient failure (after retries) lands in DISCONNECTED.
pub(crate) async fn ensure_fresh_token(
    credentials: &mut OAuth2Credentials,
    refresher: &dyn TokenRefresher,
    retry: &RetryPolicy,
    margin: chrono::Duration,
    state: &mut StateMachine,
) -> Result<bool> {
    if !credentials.needs_refresh(chrono::Utc::now(), margin) {
        return Ok(false);
    }

    state.transition(ConnectorState::TokenExpiring)?;
    state.transition(ConnectorState::Refreshing)?;
    info!(
        "Access token for {} expires at {}, refreshing",
        credentials.username, credentials.expires_at
    );

    let snapshot = credentials.clone();
    let current = &snapshot;
    match retry
        .execute("token refresh", move || refresher.refresh(current))
        .await
    {
        Ok(token) => {
            credentials.apply_token(&token, chrono::Utc::now());
            Ok(true)
        }
        Err(err) if err.is_auth() => {
            state.transition(ConnectorState::AuthFailed)?;
            Err(match err {
                ConnectorError::RefreshFailed(_) => err,
                other => ConnectorError::RefreshFailed(other.to_string()),
            })
        }
        Err(err) => {
            state.transition(ConnectorState::Disconnected)?;
            Err(err)
        }
    }
}

/// Registered application identity at one provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_POLL_TTL_SECS: u64 = 5;
const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// reqwest-backed token endpoint client.
pub struct OAuthTokenClient {
    http: Client,
    tenant: String,
    gmail: Option<OAuthClient>,
    outlook: Option<OAuthClient>,
    custom: Option<OAuthClient>,
}

impl OAuthTokenClient {
    pub fn new(tenant: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConnectorError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            tenant: tenant.into(),
            gmail: None,
            outlook: None,
            custom: None,
        })
    }

    pub fn with_client(mut self, provider: OAuth2Provider, client: OAuthClient) -> Self {
        match provider {
            OAuth2Provider::Gmail => self.gmail = Some(client),
            OAuth2Provider::Outlook => self.outlook = Some(client),
            OAuth2Provider::Custom => self.custom = Some(client),
        }
        self
    }

    fn client_for(&self, provider: OAuth2Provider) -> Result<&OAuthClient> {
        let client = match provider {
            OAuth2Provider::Gmail => self.gmail.as_ref(),
            OAuth2Provider::Outlook => self.outlook.as_ref(),
            OAuth2Provider::Custom => self.custom.as_ref(),
        };
        client.ok_or_else(|| {
            ConnectorError::Configuration(format!("No OAuth client configured for {:?}", provider))
        })
    }

    fn token_url_for(&self, provider: OAuth2Provider, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(str::to_string)
            .or_else(|| provider.token_url(&self.tenant))
            .ok_or_else(|| {
                ConnectorError::Configuration(
                    "Custom provider requires an explicit token_url".into(),
                )
            })
    }

    /// Step 1 of RFC 8628: obtain a user code to show the operator.
    pub async fn request_device_code(
        &self,
        provider: OAuth2Provider,
        kind: ProviderKind,
    ) -> Result<DeviceCodeResponse> {
        let client = self.client_for(provider)?;
        let url = provider.device_auth_url(&self.tenant).ok_or_else(|| {
            ConnectorError::Configuration("Custom provider has no device flow endpoint".into())
        })?;
        let scope = provider.scopes(kind).join(" ");

        let mut params = vec![
            ("client_id", client.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        if provider == OAuth2Provider::Gmail {
            params.push(("access_type", "offline"));
        }

        info!("Requesting device code from {} for scopes: {}", url, scope);
        let response = self.http.post(&url).form(&params).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::from_status(status, &body, None));
        }
        Ok(response.json().await?)
    }

    /// Step 2 of RFC 8628: poll until the operator approves, denies, or the code expires.
    pub async fn poll_for_token(
        &self,
        provider: OAuth2Provider,
        device_code: &DeviceCodeResponse,
    ) -> Result<TokenResponse> {
        let client = self.client_for(provider)?;
        let token_url = self.token_url_for(provider, None)?;
        let ttl = Duration::from_secs(device_code.expires_in.max(MIN_POLL_TTL_SECS));
        let deadline = tokio::time::Instant::now() + ttl;
        let max_interval = Duration::from_secs(30);
        let mut interval = Duration::from_secs(device_code.interval).max(Duration::from_secs(1));

        loop {
            if tokio::time::Instant::now() > deadline {
                return Err(ConnectorError::Auth(
                    "Device code expired before authorization".into(),
                ));
            }
            tokio::time::sleep(interval).await;

            let mut params = vec![
                ("client_id", client.client_id.as_str()),
                ("device_code", device_code.device_code.as_str()),
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ];
            if let Some(secret) = &client.client_secret {
                params.push(("client_secret", secret.expose_secret()));
            }

            let response = self.http.post(&token_url).form(&params).send().await?;
            if response.status().is_success() {
                info!("Device authorization granted");
                return Ok(response.json().await?);
            }

            let error: TokenErrorResponse = response.json().await?;
            match error.error.as_str() {
                "authorization_pending" => debug!("Authorization pending"),
                "slow_down" => {
                    interval = (interval + Duration::from_secs(5)).min(max_interval);
                    warn!("Token endpoint asked to slow down, interval now {:?}", interval);
                }
                "expired_token" => {
                    return Err(ConnectorError::Auth(
                        "Device code expired before authorization".into(),
                    ))
                }
                "access_denied" => {
                    return Err(ConnectorError::Auth("Authorization request denied".into()))
                }
                other => {
                    return Err(ConnectorError::Auth(format!(
                        "{}: {}",
                        other,
                        error.error_description.unwrap_or_default()
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenClient {
    async fn refresh(&self, credentials: &OAuth2Credentials) -> Result<TokenResponse> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| ConnectorError::RefreshFailed("No refresh token stored".into()))?;
        let client = self.client_for(credentials.provider)?;
        let token_url = self.token_url_for(credentials.provider, credentials.token_url.as_deref())?;

        let mut params = vec![
            ("client_id", client.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = &client.client_secret {
            params.push(("client_secret", secret.expose_secret()));
        }

        debug!("Refreshing access token for {}", credentials.username);
        let response = self.http.post(&token_url).form(&params).send().await?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            // invalid_grant, revoked consent, unknown client
            400 | 401 | 403 => Err(ConnectorError::RefreshFailed(format!(
                "HTTP {}: {}",
                status,
                truncate_body(&body)
            ))),
            _ => Err(ConnectorError::from_status(status, &body, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    struct StaticRefresher(std::result::Result<&'static str, u16>);

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(&self, _credentials: &OAuth2Credentials) -> Result<TokenResponse> {
            match self.0 {
                Ok(token) => Ok(TokenResponse {
                    access_token: token.to_string(),
                    token_type: None,
                    expires_in: Some(3600),
                    refresh_token: None,
                    scope: None,
                }),
                Err(400) => Err(ConnectorError::RefreshFailed("invalid_grant".into())),
                Err(status) => Err(ConnectorError::from_status(status, "", None)),
            }
        }
    }

    fn expiring_in(minutes: i64) -> OAuth2Credentials {
        OAuth2Credentials {
            provider: OAuth2Provider::Gmail,
            username: "me@example.com".into(),
            host: None,
            port: None,
            access_token: "old".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Utc::now() + ChronoDuration::minutes(minutes),
            token_url: None,
            trash_folder: None,
        }
    }

    fn connecting() -> StateMachine {
        let mut state = StateMachine::default();
        state.transition(ConnectorState::Connecting).unwrap();
        state
    }

    #[tokio::test]
    async fn test_fresh_token_is_left_alone() {
        let mut creds = expiring_in(60);
        let mut state = connecting();
        let refreshed = ensure_fresh_token(
            &mut creds,
            &StaticRefresher(Ok("new")),
            &RetryPolicy::no_retry(),
            ChronoDuration::minutes(5),
            &mut state,
        )
        .await
        .unwrap();
        assert!(!refreshed);
        assert_eq!(creds.access_token, "old");
        assert_eq!(state.current(), ConnectorState::Connecting);
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let mut creds = expiring_in(2);
        let mut state = connecting();
        let refreshed = ensure_fresh_token(
            &mut creds,
            &StaticRefresher(Ok("new")),
            &RetryPolicy::no_retry(),
            ChronoDuration::minutes(5),
            &mut state,
        )
        .await
        .unwrap();
        assert!(refreshed);
        assert_eq!(creds.access_token, "new");
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(state.current(), ConnectorState::Refreshing);
        state.transition(ConnectorState::Connected).unwrap();
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_terminal() {
        let mut creds = expiring_in(2);
        let mut state = connecting();
        let err = ensure_fresh_token(
            &mut creds,
            &StaticRefresher(Err(400)),
            &RetryPolicy::no_retry(),
            ChronoDuration::minutes(5),
            &mut state,
        )
        .await
        .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(state.current(), ConnectorState::AuthFailed);
        assert!(state.ensure_usable().is_err());
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_disconnects() {
        let mut creds = expiring_in(2);
        let mut state = connecting();
        let err = ensure_fresh_token(
            &mut creds,
            &StaticRefresher(Err(503)),
            &RetryPolicy::no_retry(),
            ChronoDuration::minutes(5),
            &mut state,
        )
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(state.current(), ConnectorState::Disconnected);
    }

    #[test]
    fn test_outlook_urls_use_tenant() {
        let url = OAuth2Provider::Outlook.token_url("contoso").unwrap();
        assert_eq!(
            url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert!(OAuth2Provider::Custom.token_url("common").is_none());
    }

    #[test]
    fn test_scopes_follow_access_path() {
        let rest = OAuth2Provider::Outlook.scopes(ProviderKind::OAuth2Rest);
        assert!(rest.contains(&"https://graph.microsoft.com/Mail.ReadWrite"));
        let imap = OAuth2Provider::Outlook.scopes(ProviderKind::OAuth2Imap);
        assert!(imap.contains(&"offline_access"));
    }

    #[test]
    fn test_token_response_optional_fields() {
        let token: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(token.refresh_token.is_none());
        assert!(token.expires_in.is_none());
    }

    #[test]
    fn test_missing_client_is_configuration_error() {
        let client = OAuthTokenClient::new("common").unwrap();
        let err = client.client_for(OAuth2Provider::Gmail).unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration(_)));
        assert!(!err.is_auth());
        assert!(!err.is_transient());

        let err = client
            .token_url_for(OAuth2Provider::Custom, None)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration(_)));
        assert!(!err.is_auth());
    }

    #[tokio::test]
    async fn test_missing_client_does_not_fail_auth() {
        let mut credentials = expiring_in(1);
        let mut state = connecting();
        let unconfigured = OAuthTokenClient::new("common").unwrap();
        let err = ensure_fresh_token(
            &mut credentials,
            &unconfigured,
            &RetryPolicy::no_retry(),
            ChronoDuration::minutes(5),
            &mut state,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectorError::Configuration(_)));
        assert_eq!(state.current(), ConnectorState::Disconnected);
    }
}

//! Daemon settings document. Every field has a default, so an empty file is valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::OllamaConfig;
use crate::connector::{ConnectorOptions, OAuthClient, RetryPolicy};
use crate::pipeline::ActionMode;
use crate::secrets::{self, CredentialVault, SecretError, VAULT_KEY_ENV_VAR};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub actions: ActionSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub vault: VaultSettings,
}

fn mailsort_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".mailsort"))
        .unwrap_or_else(|| PathBuf::from(".mailsort"))
}

fn default_database_path() -> PathBuf {
    mailsort_home().join("data").join("mailsort.db")
}

fn default_rules_path() -> PathBuf {
    mailsort_home().join("rules.yaml")
}

/// `~/.mailsort/config.yaml`
pub fn default_settings_path() -> PathBuf {
    mailsort_home().join("config.yaml")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            rules_path: default_rules_path(),
            log_level: default_log_level(),
            log_json: false,
            scheduler: SchedulerSettings::default(),
            sync: SyncSettings::default(),
            classifier: ClassifierSettings::default(),
            actions: ActionSettings::default(),
            retry: RetrySettings::default(),
            oauth: OAuthSettings::default(),
            vault: VaultSettings::default(),
        }
    }
}

impl Settings {
    pub fn connector_options(&self) -> ConnectorOptions {
        ConnectorOptions {
            retry: self.retry.policy(),
            refresh_margin: chrono::Duration::seconds(self.oauth.token_refresh_margin_secs as i64),
            preview_chars: self.sync.body_preview_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_concurrent_accounts")]
    pub max_concurrent_accounts: usize,
    /// 0 disables the per-run deadline.
    #[serde(default = "default_run_budget_secs")]
    pub run_budget_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_max_concurrent_accounts() -> usize {
    num_cpus::get()
}

fn default_run_budget_secs() -> u64 {
    240
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_concurrent_accounts: default_max_concurrent_accounts(),
            run_budget_secs: default_run_budget_secs(),
        }
    }
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    #[serde(default = "default_body_preview_chars")]
    pub body_preview_chars: usize,
    #[serde(default = "default_initial_lookback_days")]
    pub initial_lookback_days: u32,
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_fetch_limit() -> usize {
    50
}

fn default_batch_limit() -> usize {
    200
}

fn default_body_preview_chars() -> usize {
    500
}

fn default_initial_lookback_days() -> u32 {
    7
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            fetch_limit: default_fetch_limit(),
            batch_limit: default_batch_limit(),
            body_preview_chars: default_body_preview_chars(),
            initial_lookback_days: default_initial_lookback_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_prompt_body_chars")]
    pub prompt_body_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_classifier_concurrency")]
    pub max_concurrent: usize,
}

fn default_ollama_host() -> String {
    "http://ollama:11434".to_string()
}

fn default_ollama_model() -> String {
    "mistral".to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    120
}

fn default_prompt_body_chars() -> usize {
    1000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_top_p() -> f32 {
    0.9
}

fn default_classifier_concurrency() -> usize {
    4
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
            timeout_secs: default_classifier_timeout_secs(),
            prompt_body_chars: default_prompt_body_chars(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_concurrent: default_classifier_concurrency(),
        }
    }
}

impl ClassifierSettings {
    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            host: self.host.clone(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            prompt_body_chars: self.prompt_body_chars,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSettings {
    #[serde(default)]
    pub mode: ActionMode,
    #[serde(default)]
    pub permanent_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default = "default_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,
    /// Microsoft identity platform tenant.
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default)]
    pub gmail: Option<ClientSettings>,
    #[serde(default)]
    pub outlook: Option<ClientSettings>,
}

fn default_refresh_margin_secs() -> u64 {
    300
}

fn default_tenant() -> String {
    "common".to_string()
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            token_refresh_margin_secs: default_refresh_margin_secs(),
            tenant: default_tenant(),
            gmail: None,
            outlook: None,
        }
    }
}

/// An OAuth2 client registration. The secret resolves from a direct value,
/// then a file, then an env var; public clients have none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<String>,
    #[serde(default)]
    pub client_secret_env: Option<String>,
}

impl ClientSettings {
    pub fn resolve(&self) -> Result<OAuthClient, SecretError> {
        let client_secret = secrets::resolve_secret_optional(
            self.client_secret.as_deref(),
            self.client_secret_file.as_deref(),
            self.client_secret_env.as_deref(),
        )?;
        Ok(OAuthClient {
            client_id: self.client_id.clone(),
            client_secret,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default = "default_vault_key_env")]
    pub key_env: String,
}

fn default_vault_key_env() -> String {
    VAULT_KEY_ENV_VAR.to_string()
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            key: None,
            key_file: None,
            key_env: default_vault_key_env(),
        }
    }
}

impl VaultSettings {
    pub fn open(&self) -> Result<CredentialVault, SecretError> {
        let key = secrets::resolve_secret(
            self.key.as_deref(),
            self.key_file.as_deref(),
            Some(self.key_env.as_str()),
        )?;
        CredentialVault::from_secret(&key)
    }
}

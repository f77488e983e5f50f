//! Core domain types shared by every stage of the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of categories a message can be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Invoice,
    Receipt,
    Document,
    Professional,
    Newsletter,
    Promotion,
    Social,
    Notification,
    Personal,
    Spam,
    #[default]
    Unclassified,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Invoice,
        Category::Receipt,
        Category::Document,
        Category::Professional,
        Category::Newsletter,
        Category::Promotion,
        Category::Social,
        Category::Notification,
        Category::Personal,
        Category::Spam,
        Category::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Invoice => "invoice",
            Category::Receipt => "receipt",
            Category::Document => "document",
            Category::Professional => "professional",
            Category::Newsletter => "newsletter",
            Category::Promotion => "promotion",
            Category::Social => "social",
            Category::Notification => "notification",
            Category::Personal => "personal",
            Category::Spam => "spam",
            Category::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Where a message sits in the sync → classify → act lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Pending,
    Classified,
    Actioned,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Classified => "CLASSIFIED",
            ProcessingStatus::Actioned => "ACTIONED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ProcessingStatus::Pending),
            "CLASSIFIED" => Some(ProcessingStatus::Classified),
            "ACTIONED" => Some(ProcessingStatus::Actioned),
            "FAILED" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a classification decision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Provenance {
    Rule(String),
    Model,
    #[default]
    None,
}

impl Provenance {
    const RULE_PREFIX: &'static str = "RULE:";

    pub fn parse(s: &str) -> Self {
        if let Some(name) = s.strip_prefix(Self::RULE_PREFIX) {
            return Provenance::Rule(name.to_string());
        }
        match s {
            "MODEL" => Provenance::Model,
            _ => Provenance::None,
        }
    }

    pub fn rule_name(&self) -> Option<&str> {
        match self {
            Provenance::Rule(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Rule(name) => write!(f, "{}{}", Self::RULE_PREFIX, name),
            Provenance::Model => f.write_str("MODEL"),
            Provenance::None => f.write_str("NONE"),
        }
    }
}

/// Provider protocol family an account is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// IMAP with a password or app token.
    PasswordImap,
    /// IMAP authenticated with XOAUTH2 bearer tokens.
    #[serde(rename = "oauth2_imap")]
    OAuth2Imap,
    /// REST graph-style mail API with bearer tokens.
    #[serde(rename = "oauth2_rest")]
    OAuth2Rest,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::PasswordImap => "password_imap",
            ProviderKind::OAuth2Imap => "oauth2_imap",
            ProviderKind::OAuth2Rest => "oauth2_rest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "password_imap" => Some(ProviderKind::PasswordImap),
            "oauth2_imap" => Some(ProviderKind::OAuth2Imap),
            "oauth2_rest" => Some(ProviderKind::OAuth2Rest),
            _ => None,
        }
    }

    pub fn uses_oauth(&self) -> bool {
        !matches!(self, ProviderKind::PasswordImap)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mailbox under management.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub provider: ProviderKind,
    /// Sealed credential payload; only the vault can read it.
    pub credential_blob: String,
    /// Wall-clock time of the last fully successful run.
    pub last_sync: Option<DateTime<Utc>>,
    /// Newest receipt time already synced; the next fetch starts after it.
    pub sync_watermark: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set on terminal auth failure; cleared when credentials are replaced.
    pub requires_reauth: bool,
    pub created_at: DateTime<Utc>,
}

/// A message as returned by a provider, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMessage {
    pub provider_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body_preview: String,
    pub attachment_names: Vec<String>,
    pub has_attachments: bool,
}

/// Action hint carried from a matching rule to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleHint {
    pub folder: Option<String>,
    pub auto_delete: bool,
}

/// A stored message and its classification state.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub account_id: String,
    pub provider_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body_preview: String,
    pub attachment_names: Vec<String>,
    pub has_attachments: bool,
    pub category: Category,
    pub confidence: u8,
    pub provenance: Provenance,
    pub status: ProcessingStatus,
    pub rule_hint: RuleHint,
    pub rationale: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one attempted provider action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Failure => "FAILURE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(AuditOutcome::Success),
            "FAILURE" => Some(AuditOutcome::Failure),
            _ => None,
        }
    }
}

/// An audit record waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub account_id: String,
    pub message_ref: String,
    pub action: String,
    pub outcome: AuditOutcome,
    pub details: serde_json::Value,
    pub component: String,
}

/// A persisted, immutable audit record.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub account_id: String,
    pub message_ref: String,
    pub action: String,
    pub outcome: AuditOutcome,
    pub details: serde_json::Value,
    pub component: String,
    pub created_at: DateTime<Utc>,
}

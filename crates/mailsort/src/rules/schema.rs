//! Serde shape of the declarative rule document.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub version: Option<String>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub priority: i64,
    pub conditions: Option<ConditionSpec>,
    pub category: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub auto_delete: bool,
}

/// Each string value is a `|`-separated list of alternatives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionSpec {
    #[serde(default)]
    pub sender_contains: Option<String>,
    #[serde(default)]
    pub sender_equals: Option<String>,
    #[serde(default)]
    pub subject_contains: Option<String>,
    #[serde(default)]
    pub subject_equals: Option<String>,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(default)]
    pub attachment_name_contains: Option<String>,
    #[serde(default)]
    pub has_attachments: Option<bool>,
}

impl ConditionSpec {
    pub fn is_empty(&self) -> bool {
        self.sender_contains.is_none()
            && self.sender_equals.is_none()
            && self.subject_contains.is_none()
            && self.subject_equals.is_none()
            && self.body_contains.is_none()
            && self.attachment_name_contains.is_none()
            && self.has_attachments.is_none()
    }
}

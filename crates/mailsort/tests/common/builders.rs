//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use mailsort::model::{Category, FetchedMessage};
use mailsort::rules::{MatchMode, Predicate, Rule, TextField};

/// Builder for compiled [`Rule`]s.
pub struct RuleBuilder {
    name: String,
    priority: i64,
    predicates: Vec<Predicate>,
    category: Category,
    folder: Option<String>,
    auto_delete: bool,
}

impl RuleBuilder {
    pub fn new(name: &str, category: Category) -> Self {
        Self {
            name: name.to_string(),
            priority: 0,
            predicates: Vec::new(),
            category,
            folder: None,
            auto_delete: false,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn sender_contains(self, alternatives: &str) -> Self {
        self.text(TextField::Sender, MatchMode::Contains, alternatives)
    }

    pub fn subject_contains(self, alternatives: &str) -> Self {
        self.text(TextField::Subject, MatchMode::Contains, alternatives)
    }

    pub fn attachment_contains(self, alternatives: &str) -> Self {
        self.text(TextField::AttachmentName, MatchMode::Contains, alternatives)
    }

    pub fn has_attachments(mut self, expected: bool) -> Self {
        self.predicates.push(Predicate::HasAttachments(expected));
        self
    }

    pub fn folder(mut self, folder: &str) -> Self {
        self.folder = Some(folder.to_string());
        self
    }

    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    fn text(mut self, field: TextField, mode: MatchMode, alternatives: &str) -> Self {
        let predicate = Predicate::text(field, mode, alternatives)
            .unwrap_or_else(|| panic!("no literal in '{}'", alternatives));
        self.predicates.push(predicate);
        self
    }

    pub fn build(self) -> Rule {
        Rule {
            name: self.name,
            priority: self.priority,
            predicates: self.predicates,
            category: self.category,
            folder: self.folder,
            auto_delete: self.auto_delete,
        }
    }
}

/// Builder for provider-side messages handed to the fake connector.
pub struct FetchedBuilder {
    message: FetchedMessage,
}

impl FetchedBuilder {
    pub fn new(provider_id: &str) -> Self {
        Self {
            message: FetchedMessage {
                provider_id: provider_id.to_string(),
                subject: format!("Message {}", provider_id),
                sender: "someone@example.com".to_string(),
                received_at: Utc::now() - Duration::minutes(5),
                body_preview: String::new(),
                attachment_names: Vec::new(),
                has_attachments: false,
            },
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.message.subject = subject.to_string();
        self
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.message.sender = sender.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.message.body_preview = body.to_string();
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.message.received_at = at;
        self
    }

    pub fn minutes_ago(self, minutes: i64) -> Self {
        self.received_at(Utc::now() - Duration::minutes(minutes))
    }

    pub fn attachment(mut self, name: &str) -> Self {
        self.message.attachment_names.push(name.to_string());
        self.message.has_attachments = true;
        self
    }

    pub fn build(self) -> FetchedMessage {
        self.message
    }
}

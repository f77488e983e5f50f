//! Compiled rules and first-match evaluation.

use std::cmp::Reverse;

use crate::model::{Category, Message, RuleHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Sender,
    Subject,
    Body,
    AttachmentName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Contains,
    Equals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Holds when any literal matches. Literals are lowercased and trimmed.
    Text {
        field: TextField,
        mode: MatchMode,
        literals: Vec<String>,
    },
    HasAttachments(bool),
}

impl Predicate {
    /// Builds a text predicate from a `|`-separated list. `None` if no literal survives trimming.
    pub fn text(field: TextField, mode: MatchMode, alternatives: &str) -> Option<Self> {
        let literals: Vec<String> = alternatives
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect();
        if literals.is_empty() {
            return None;
        }
        Some(Predicate::Text {
            field,
            mode,
            literals,
        })
    }

    fn matches(&self, input: &PreparedInput) -> bool {
        match self {
            Predicate::HasAttachments(expected) => input.has_attachments == *expected,
            Predicate::Text {
                field,
                mode,
                literals,
            } => {
                let test = |value: &str| {
                    literals.iter().any(|lit| match mode {
                        MatchMode::Contains => value.contains(lit.as_str()),
                        MatchMode::Equals => value.trim() == lit.as_str(),
                    })
                };
                match field {
                    TextField::Sender => test(&input.sender),
                    TextField::Subject => test(&input.subject),
                    TextField::Body => test(&input.body),
                    TextField::AttachmentName => input.attachment_names.iter().any(|n| test(n)),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub priority: i64,
    pub predicates: Vec<Predicate>,
    pub category: Category,
    pub folder: Option<String>,
    pub auto_delete: bool,
}

impl Rule {
    pub fn hint(&self) -> RuleHint {
        RuleHint {
            folder: self.folder.clone(),
            auto_delete: self.auto_delete,
        }
    }

    fn matches(&self, input: &PreparedInput) -> bool {
        !self.predicates.is_empty() && self.predicates.iter().all(|p| p.matches(input))
    }
}

/// The fields of a message rules can look at.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub attachment_names: &'a [String],
    pub has_attachments: bool,
}

impl<'a> From<&'a Message> for MatchInput<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            sender: &message.sender,
            subject: &message.subject,
            body: &message.body_preview,
            attachment_names: &message.attachment_names,
            has_attachments: message.has_attachments,
        }
    }
}

struct PreparedInput {
    sender: String,
    subject: String,
    body: String,
    attachment_names: Vec<String>,
    has_attachments: bool,
}

impl PreparedInput {
    fn new(input: &MatchInput<'_>) -> Self {
        Self {
            sender: input.sender.to_lowercase(),
            subject: input.subject.to_lowercase(),
            body: input.body.to_lowercase(),
            attachment_names: input
                .attachment_names
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            has_attachments: input.has_attachments || !input.attachment_names.is_empty(),
        }
    }
}

/// An immutable, priority-ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Orders by priority, highest first. The sort is stable, so equal
    /// priorities keep their declaration order.
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(|r| Reverse(r.priority));
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule whose every predicate holds.
    pub fn evaluate(&self, input: &MatchInput<'_>) -> Option<&Rule> {
        let prepared = PreparedInput::new(input);
        self.rules.iter().find(|rule| rule.matches(&prepared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, priority: i64, predicates: Vec<Predicate>, category: Category) -> Rule {
        Rule {
            name: name.to_string(),
            priority,
            predicates,
            category,
            folder: None,
            auto_delete: false,
        }
    }

    fn input<'a>(sender: &'a str, subject: &'a str) -> MatchInput<'a> {
        MatchInput {
            sender,
            subject,
            body: "",
            attachment_names: &[],
            has_attachments: false,
        }
    }

    fn subject_contains(s: &str) -> Predicate {
        Predicate::text(TextField::Subject, MatchMode::Contains, s).unwrap()
    }

    #[test]
    fn test_pipe_literals_are_trimmed_and_lowercased() {
        let p = Predicate::text(TextField::Sender, MatchMode::Contains, " A.com | |B.com ").unwrap();
        assert_eq!(
            p,
            Predicate::Text {
                field: TextField::Sender,
                mode: MatchMode::Contains,
                literals: vec!["a.com".into(), "b.com".into()],
            }
        );
        assert!(Predicate::text(TextField::Sender, MatchMode::Contains, " | ").is_none());
    }

    #[test]
    fn test_highest_priority_wins() {
        let set = RuleSet::new(vec![
            rule("low", 1, vec![subject_contains("invoice")], Category::Document),
            rule("high", 10, vec![subject_contains("invoice")], Category::Invoice),
        ]);
        let hit = set.evaluate(&input("x@y.z", "Invoice attached")).unwrap();
        assert_eq!(hit.name, "high");
    }

    #[test]
    fn test_equal_priority_keeps_declaration_order() {
        let set = RuleSet::new(vec![
            rule("first", 5, vec![subject_contains("hello")], Category::Personal),
            rule("second", 5, vec![subject_contains("hello")], Category::Social),
        ]);
        assert_eq!(set.evaluate(&input("", "hello")).unwrap().name, "first");
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let set = RuleSet::new(vec![rule(
            "both",
            1,
            vec![
                subject_contains("report"),
                Predicate::text(TextField::Sender, MatchMode::Contains, "corp.example").unwrap(),
            ],
            Category::Professional,
        )]);
        assert!(set.evaluate(&input("boss@corp.example", "Weekly report")).is_some());
        assert!(set.evaluate(&input("friend@home.example", "Weekly report")).is_none());
    }

    #[test]
    fn test_equals_requires_whole_value() {
        let set = RuleSet::new(vec![rule(
            "exact",
            1,
            vec![Predicate::text(TextField::Subject, MatchMode::Equals, "Hi").unwrap()],
            Category::Personal,
        )]);
        assert!(set.evaluate(&input("", "hi")).is_some());
        assert!(set.evaluate(&input("", "hi there")).is_none());
    }

    #[test]
    fn test_attachment_predicates() {
        let names = vec!["Facture-2026.PDF".to_string()];
        let set = RuleSet::new(vec![rule(
            "pdf",
            1,
            vec![
                Predicate::HasAttachments(true),
                Predicate::text(TextField::AttachmentName, MatchMode::Contains, ".pdf").unwrap(),
            ],
            Category::Document,
        )]);
        let with = MatchInput {
            sender: "",
            subject: "",
            body: "",
            attachment_names: &names,
            has_attachments: true,
        };
        assert!(set.evaluate(&with).is_some());
        assert!(set.evaluate(&input("", "")).is_none());
    }

    #[test]
    fn test_rule_without_predicates_never_matches() {
        let set = RuleSet::new(vec![rule("empty", 1, vec![], Category::Spam)]);
        assert!(set.evaluate(&input("", "")).is_none());
    }
}

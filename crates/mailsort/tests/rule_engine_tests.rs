//! Table-driven tests for rule matching.
//!
//! Tests cover sender and subject alternatives, attachment predicates,
//! priority ordering and YAML loading.

mod common;

use common::RuleBuilder;
use mailsort::model::Category;
use mailsort::rules::{load_rules_from_str, MatchInput, RuleSet};

/// A single rule-matching test case.
struct MatchTestCase {
    name: &'static str,
    sender: &'static str,
    subject: &'static str,
    attachments: &'static [&'static str],
    /// Expected rule name (None if no rule should match).
    expected_rule: Option<&'static str>,
}

const MATCH_TESTS: &[MatchTestCase] = &[
    MatchTestCase {
        name: "subject_alternative_first",
        sender: "billing@shop.example",
        subject: "Your Invoice #42",
        attachments: &[],
        expected_rule: Some("Invoices"),
    },
    MatchTestCase {
        name: "subject_alternative_second",
        sender: "compta@fournisseur.example",
        subject: "Facture du mois",
        attachments: &[],
        expected_rule: Some("Invoices"),
    },
    MatchTestCase {
        name: "sender_first_domain",
        sender: "news@a.com",
        subject: "Weekly digest",
        attachments: &[],
        expected_rule: Some("Newsletters"),
    },
    MatchTestCase {
        name: "sender_second_domain_uppercase",
        sender: "Team@B.COM",
        subject: "Weekly digest",
        attachments: &[],
        expected_rule: Some("Newsletters"),
    },
    MatchTestCase {
        name: "sender_other_domain",
        sender: "someone@c.com",
        subject: "Weekly digest",
        attachments: &[],
        expected_rule: None,
    },
    MatchTestCase {
        name: "attachment_and_flag_both_hold",
        sender: "scanner@office.example",
        subject: "Scan",
        attachments: &["scan_0001.PDF"],
        expected_rule: Some("Documents"),
    },
    MatchTestCase {
        name: "attachment_missing",
        sender: "scanner@office.example",
        subject: "Scan",
        attachments: &[],
        expected_rule: None,
    },
    MatchTestCase {
        name: "higher_priority_wins_when_both_match",
        sender: "news@a.com",
        subject: "Invoice attached to the newsletter",
        attachments: &[],
        expected_rule: Some("Invoices"),
    },
];

fn create_rule_set() -> RuleSet {
    RuleSet::new(vec![
        RuleBuilder::new("Newsletters", Category::Newsletter)
            .sender_contains("a.com|b.com")
            .priority(10)
            .build(),
        RuleBuilder::new("Documents", Category::Document)
            .attachment_contains(".pdf")
            .has_attachments(true)
            .priority(50)
            .build(),
        RuleBuilder::new("Invoices", Category::Invoice)
            .subject_contains("invoice|facture")
            .folder("Finance/Invoices")
            .priority(100)
            .build(),
    ])
}

#[test]
fn test_rule_matching() {
    let rules = create_rule_set();

    for test_case in MATCH_TESTS {
        let attachments: Vec<String> = test_case.attachments.iter().map(|s| s.to_string()).collect();
        let input = MatchInput {
            sender: test_case.sender,
            subject: test_case.subject,
            body: "",
            attachment_names: &attachments,
            has_attachments: !attachments.is_empty(),
        };

        let matched = rules.evaluate(&input).map(|r| r.name.as_str());
        assert_eq!(
            matched, test_case.expected_rule,
            "Test '{}': Expected rule {:?}, got {:?}",
            test_case.name, test_case.expected_rule, matched
        );
    }
}

#[test]
fn test_priority_change_changes_winner() {
    let input = MatchInput {
        sender: "news@a.com",
        subject: "Invoice inside",
        body: "",
        attachment_names: &[],
        has_attachments: false,
    };

    let build = |invoice_priority: i64, newsletter_priority: i64| {
        RuleSet::new(vec![
            RuleBuilder::new("Invoices", Category::Invoice)
                .subject_contains("invoice")
                .priority(invoice_priority)
                .build(),
            RuleBuilder::new("Newsletters", Category::Newsletter)
                .sender_contains("a.com")
                .priority(newsletter_priority)
                .build(),
        ])
    };

    let before = build(100, 10);
    assert_eq!(before.evaluate(&input).map(|r| r.category), Some(Category::Invoice));

    let after = build(100, 200);
    assert_eq!(
        after.evaluate(&input).map(|r| r.category),
        Some(Category::Newsletter)
    );
}

#[test]
fn test_equal_priority_keeps_declaration_order() {
    let rules = RuleSet::new(vec![
        RuleBuilder::new("First", Category::Notification)
            .subject_contains("alert")
            .priority(5)
            .build(),
        RuleBuilder::new("Second", Category::Spam)
            .subject_contains("alert")
            .priority(5)
            .build(),
    ]);
    let input = MatchInput {
        sender: "",
        subject: "Security alert",
        body: "",
        attachment_names: &[],
        has_attachments: false,
    };
    assert_eq!(rules.evaluate(&input).map(|r| r.name.as_str()), Some("First"));
}

#[test]
fn test_loaded_rules_carry_hints() {
    let rules = load_rules_from_str(
        r#"
rules:
  - name: Invoices
    priority: 100
    conditions:
      subject_contains: "invoice|facture"
    category: invoice
    folder: Finance/Invoices
  - name: Junk
    priority: 10
    conditions:
      sender_contains: "spam.example"
    category: spam
    auto_delete: true
"#,
    )
    .expect("valid rule document");

    assert_eq!(rules.len(), 2);
    assert_eq!(rules.rules()[0].name, "Invoices");

    let junk = MatchInput {
        sender: "promo@spam.example",
        subject: "WIN",
        body: "",
        attachment_names: &[],
        has_attachments: false,
    };
    let rule = rules.evaluate(&junk).expect("junk rule matches");
    assert_eq!(rule.category, Category::Spam);
    assert!(rule.hint().auto_delete);
    assert!(rule.hint().folder.is_none());
}

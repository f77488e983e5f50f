//! Action dispatcher tests against the record store and a fake provider.

mod common;

use std::sync::Arc;

use common::{FakeConnector, FetchedBuilder, SharedMailbox, TestHarness};
use mailsort::actions::{ActionDispatcher, ActionPlan, ActionResult, BulkStatus, BULK_MOVE};
use mailsort::connector::MailConnector;
use mailsort::db::{ClassificationUpdate, RecordStore};
use mailsort::model::{AuditOutcome, Category, Message, ProcessingStatus, Provenance, RuleHint};

/// Stores `ids` for `acct`, classified as `category`, and puts them in the mailbox.
fn seed(harness: &TestHarness, mailbox: &SharedMailbox, ids: &[&str], category: Category) -> Vec<Message> {
    let store = harness.store();
    let mut stored = Vec::new();
    for id in ids {
        let fetched = FetchedBuilder::new(id).build();
        mailbox.lock().unwrap().messages.push(fetched.clone());
        store.insert_message_if_new("acct", &fetched).unwrap();

        let message = store.find_message("acct", id).unwrap().unwrap();
        store
            .update_classification(
                message.id,
                &ClassificationUpdate {
                    category,
                    confidence: 90,
                    provenance: Provenance::Model,
                    status: ProcessingStatus::Classified,
                    rule_hint: RuleHint::default(),
                    rationale: None,
                },
            )
            .unwrap();
        stored.push(store.get_message(message.id).unwrap().unwrap());
    }
    stored
}

#[tokio::test]
async fn test_bulk_move_with_one_failure() {
    let harness = TestHarness::new();
    let mailbox = harness.enroll("acct");
    let messages = seed(
        &harness,
        &mailbox,
        &["m1", "m2", "m3", "m4", "m5"],
        Category::Document,
    );
    mailbox.lock().unwrap().broken.insert("m3".to_string());

    let store = harness.store();
    let dispatcher = ActionDispatcher::new(Arc::clone(&store), false);
    let mut connector = FakeConnector::connected(mailbox.clone());
    let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();

    let result = dispatcher
        .bulk_move(&mut connector, "acct", &ids, "Archive/2026")
        .await;

    assert_eq!(result.total, 5);
    assert_eq!(result.succeeded.len(), 4);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, messages[2].id);
    assert_eq!(result.status(), BulkStatus::Partial);
    assert_eq!(mailbox.lock().unwrap().moved.len(), 4);

    let mut audited = 0;
    for message in &messages {
        let entries = store.audit_for_message("acct", &message.provider_id).unwrap();
        assert_eq!(entries.len(), 1, "one audit entry for {}", message.provider_id);
        assert_eq!(entries[0].action, BULK_MOVE);
        let expected = if message.provider_id == "m3" {
            AuditOutcome::Failure
        } else {
            AuditOutcome::Success
        };
        assert_eq!(entries[0].outcome, expected, "outcome for {}", message.provider_id);
        audited += entries.len();
    }
    assert_eq!(audited, 5);

    let failed = store.get_message(messages[2].id).unwrap().unwrap();
    assert_eq!(failed.status, ProcessingStatus::Failed);
    let moved = store.get_message(messages[0].id).unwrap().unwrap();
    assert_eq!(moved.status, ProcessingStatus::Actioned);
}

#[tokio::test]
async fn test_delete_twice_reports_missing_message() {
    let harness = TestHarness::new();
    let mailbox = harness.enroll("acct");
    seed(&harness, &mailbox, &["gone"], Category::Spam);

    let mut connector = FakeConnector::connected(mailbox.clone());
    assert!(connector.delete_message("gone", false).await.unwrap());
    assert!(!connector.delete_message("gone", false).await.unwrap());
    assert_eq!(mailbox.lock().unwrap().deleted, vec![("gone".to_string(), false)]);
}

#[tokio::test]
async fn test_dispatch_of_already_removed_message_is_audited_failure() {
    let harness = TestHarness::new();
    let mailbox = harness.enroll("acct");
    let messages = seed(&harness, &mailbox, &["spam-1"], Category::Spam);
    mailbox.lock().unwrap().messages.clear();

    let store = harness.store();
    let dispatcher = ActionDispatcher::new(Arc::clone(&store), false);
    let mut connector = FakeConnector::connected(mailbox.clone());

    let result = dispatcher.dispatch(&mut connector, &messages[0]).await.unwrap();
    assert!(matches!(
        result,
        ActionResult::Failed {
            plan: ActionPlan::Delete,
            ..
        }
    ));

    let entries = store.audit_for_message("acct", "spam-1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, AuditOutcome::Failure);
    assert_eq!(
        store.get_message(messages[0].id).unwrap().unwrap().status,
        ProcessingStatus::Failed
    );
}

#[tokio::test]
async fn test_dispatch_batch_continues_past_failures() {
    let harness = TestHarness::new();
    let mailbox = harness.enroll("acct");
    let messages = seed(&harness, &mailbox, &["a", "b", "c"], Category::Newsletter);
    mailbox.lock().unwrap().broken.insert("a".to_string());

    let store = harness.store();
    let dispatcher = ActionDispatcher::new(Arc::clone(&store), false);
    let mut connector = FakeConnector::connected(mailbox.clone());

    let summary = dispatcher.dispatch_batch(&mut connector, &messages, None).await;
    assert_eq!(summary.actioned, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.not_started, 0);

    let moved = mailbox.lock().unwrap().moved.clone();
    assert_eq!(
        moved,
        vec![
            ("b".to_string(), "Newsletters".to_string()),
            ("c".to_string(), "Newsletters".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_personal_mail_is_settled_without_provider_call() {
    let harness = TestHarness::new();
    let mailbox = harness.enroll("acct");
    let messages = seed(&harness, &mailbox, &["p1"], Category::Personal);

    let store = harness.store();
    let dispatcher = ActionDispatcher::new(Arc::clone(&store), false);
    let mut connector = FakeConnector::connected(mailbox.clone());

    let result = dispatcher.dispatch(&mut connector, &messages[0]).await.unwrap();
    assert_eq!(result, ActionResult::NoAction);
    assert!(mailbox.lock().unwrap().moved.is_empty());
    assert!(store.audit_for_message("acct", "p1").unwrap().is_empty());
    assert_eq!(
        store.get_message(messages[0].id).unwrap().unwrap().status,
        ProcessingStatus::Actioned
    );
}

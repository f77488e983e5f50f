//! The record-store boundary used by the pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::message_repo::ClassificationUpdate;
use super::{account_repo, audit_repo, message_repo, Database, DatabaseError};
use crate::model::{Account, AuditEntry, FetchedMessage, Message, NewAuditEntry, ProcessingStatus};

/// Reads and writes the pipeline needs; nothing here deletes data.
pub trait RecordStore: Send + Sync {
    fn get_account(&self, id: &str) -> Result<Option<Account>, DatabaseError>;
    fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError>;
    fn store_refreshed_credentials(&self, id: &str, blob: &str) -> Result<(), DatabaseError>;
    fn advance_watermark(&self, id: &str, watermark: DateTime<Utc>) -> Result<(), DatabaseError>;
    fn record_sync_success(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError>;
    fn record_account_error(
        &self,
        id: &str,
        error: &str,
        requires_reauth: bool,
    ) -> Result<(), DatabaseError>;

    fn insert_message_if_new(
        &self,
        account_id: &str,
        message: &FetchedMessage,
    ) -> Result<bool, DatabaseError>;
    fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError>;
    fn find_message(
        &self,
        account_id: &str,
        provider_id: &str,
    ) -> Result<Option<Message>, DatabaseError>;
    fn messages_with_status(
        &self,
        account_id: &str,
        status: ProcessingStatus,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError>;
    fn update_classification(
        &self,
        id: i64,
        update: &ClassificationUpdate,
    ) -> Result<(), DatabaseError>;
    fn update_status(&self, id: i64, status: ProcessingStatus) -> Result<(), DatabaseError>;
    fn status_counts(&self, account_id: &str) -> Result<BTreeMap<String, i64>, DatabaseError>;

    fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64, DatabaseError>;
    fn audit_for_message(
        &self,
        account_id: &str,
        message_ref: &str,
    ) -> Result<Vec<AuditEntry>, DatabaseError>;
}

impl RecordStore for Database {
    fn get_account(&self, id: &str) -> Result<Option<Account>, DatabaseError> {
        account_repo::find(self, id)
    }

    fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        account_repo::list(self)
    }

    fn store_refreshed_credentials(&self, id: &str, blob: &str) -> Result<(), DatabaseError> {
        account_repo::store_refreshed_credentials(self, id, blob)
    }

    fn advance_watermark(&self, id: &str, watermark: DateTime<Utc>) -> Result<(), DatabaseError> {
        account_repo::advance_watermark(self, id, watermark)
    }

    fn record_sync_success(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        account_repo::record_sync_success(self, id, at)
    }

    fn record_account_error(
        &self,
        id: &str,
        error: &str,
        requires_reauth: bool,
    ) -> Result<(), DatabaseError> {
        account_repo::record_error(self, id, error, requires_reauth)
    }

    fn insert_message_if_new(
        &self,
        account_id: &str,
        message: &FetchedMessage,
    ) -> Result<bool, DatabaseError> {
        message_repo::insert_if_new(self, account_id, message)
    }

    fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError> {
        message_repo::find(self, id)
    }

    fn find_message(
        &self,
        account_id: &str,
        provider_id: &str,
    ) -> Result<Option<Message>, DatabaseError> {
        message_repo::find_by_provider_id(self, account_id, provider_id)
    }

    fn messages_with_status(
        &self,
        account_id: &str,
        status: ProcessingStatus,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        message_repo::list_by_status(self, account_id, status, limit)
    }

    fn update_classification(
        &self,
        id: i64,
        update: &ClassificationUpdate,
    ) -> Result<(), DatabaseError> {
        message_repo::update_classification(self, id, update)
    }

    fn update_status(&self, id: i64, status: ProcessingStatus) -> Result<(), DatabaseError> {
        message_repo::update_status(self, id, status)
    }

    fn status_counts(&self, account_id: &str) -> Result<BTreeMap<String, i64>, DatabaseError> {
        message_repo::count_by_status(self, account_id)
    }

    fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64, DatabaseError> {
        audit_repo::append(self, entry)
    }

    fn audit_for_message(
        &self,
        account_id: &str,
        message_ref: &str,
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        audit_repo::list_for_message(self, account_id, message_ref)
    }
}

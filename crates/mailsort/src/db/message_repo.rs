//! Message repository.
//!
//! Rows are keyed by `(account_id, provider_id)`; re-synced messages are
//! ignored rather than overwritten so classification state survives.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{from_db_time, to_db_time, Database, DatabaseError};
use crate::model::{
    Category, FetchedMessage, Message, ProcessingStatus, Provenance, RuleHint,
};

const COLUMNS: &str = "id, account_id, provider_id, subject, sender, received_at, body_preview,
                       attachment_names, has_attachments, category, confidence, provenance,
                       status, rule_folder, rule_auto_delete, rationale, updated_at";

struct MessageRow {
    id: i64,
    account_id: String,
    provider_id: String,
    subject: String,
    sender: String,
    received_at: String,
    body_preview: String,
    attachment_names: String,
    has_attachments: bool,
    category: String,
    confidence: i64,
    provenance: String,
    status: String,
    rule_folder: Option<String>,
    rule_auto_delete: bool,
    rationale: Option<String>,
    updated_at: String,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            provider_id: row.get(2)?,
            subject: row.get(3)?,
            sender: row.get(4)?,
            received_at: row.get(5)?,
            body_preview: row.get(6)?,
            attachment_names: row.get(7)?,
            has_attachments: row.get(8)?,
            category: row.get(9)?,
            confidence: row.get(10)?,
            provenance: row.get(11)?,
            status: row.get(12)?,
            rule_folder: row.get(13)?,
            rule_auto_delete: row.get(14)?,
            rationale: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_message(self) -> Result<Message, DatabaseError> {
        let corrupt = |column: &'static str, value: &str| DatabaseError::Corrupt {
            table: "messages",
            column,
            value: value.to_string(),
        };

        let attachment_names: Vec<String> = serde_json::from_str(&self.attachment_names)
            .map_err(|_| corrupt("attachment_names", &self.attachment_names))?;
        let category: Category = self
            .category
            .parse()
            .map_err(|_| corrupt("category", &self.category))?;
        let status =
            ProcessingStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;

        Ok(Message {
            id: self.id,
            account_id: self.account_id,
            provider_id: self.provider_id,
            subject: self.subject,
            sender: self.sender,
            received_at: from_db_time("messages", "received_at", &self.received_at)?,
            body_preview: self.body_preview,
            attachment_names,
            has_attachments: self.has_attachments,
            category,
            confidence: self.confidence.clamp(0, 100) as u8,
            provenance: Provenance::parse(&self.provenance),
            status,
            rule_hint: RuleHint {
                folder: self.rule_folder,
                auto_delete: self.rule_auto_delete,
            },
            rationale: self.rationale,
            updated_at: from_db_time("messages", "updated_at", &self.updated_at)?,
        })
    }
}

/// Classification fields written back by the orchestrator.
#[derive(Debug, Clone)]
pub struct ClassificationUpdate {
    pub category: Category,
    pub confidence: u8,
    pub provenance: Provenance,
    pub status: ProcessingStatus,
    pub rule_hint: RuleHint,
    pub rationale: Option<String>,
}

/// Inserts a fetched message unless `(account_id, provider_id)` already exists.
///
/// Returns `true` when a new row was written.
pub fn insert_if_new(
    db: &Database,
    account_id: &str,
    fetched: &FetchedMessage,
) -> Result<bool, DatabaseError> {
    let names = serde_json::to_string(&fetched.attachment_names).map_err(|e| {
        DatabaseError::Corrupt {
            table: "messages",
            column: "attachment_names",
            value: e.to_string(),
        }
    })?;
    let now = to_db_time(&Utc::now());

    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages
                (account_id, provider_id, subject, sender, received_at, body_preview,
                 attachment_names, has_attachments, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                account_id,
                fetched.provider_id,
                fetched.subject,
                fetched.sender,
                to_db_time(&fetched.received_at),
                fetched.body_preview,
                names,
                fetched.has_attachments,
                now,
            ],
        )?;
        Ok(inserted == 1)
    })
}

pub fn find(db: &Database, id: i64) -> Result<Option<Message>, DatabaseError> {
    let row = db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", COLUMNS),
            params![id],
            MessageRow::from_row,
        )
        .optional()
        .map_err(DatabaseError::from)
    })?;
    row.map(MessageRow::into_message).transpose()
}

pub fn find_by_provider_id(
    db: &Database,
    account_id: &str,
    provider_id: &str,
) -> Result<Option<Message>, DatabaseError> {
    let row = db.with_conn(|conn| {
        conn.query_row(
            &format!(
                "SELECT {} FROM messages WHERE account_id = ?1 AND provider_id = ?2",
                COLUMNS
            ),
            params![account_id, provider_id],
            MessageRow::from_row,
        )
        .optional()
        .map_err(DatabaseError::from)
    })?;
    row.map(MessageRow::into_message).transpose()
}

/// Lists an account's messages in a given status, newest first.
pub fn list_by_status(
    db: &Database,
    account_id: &str,
    status: ProcessingStatus,
    limit: usize,
) -> Result<Vec<Message>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE account_id = ?1 AND status = ?2
             ORDER BY received_at DESC LIMIT ?3",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![account_id, status.as_str(), limit as i64],
                MessageRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(MessageRow::into_message).collect()
}

pub fn update_classification(
    db: &Database,
    id: i64,
    update: &ClassificationUpdate,
) -> Result<(), DatabaseError> {
    let now = to_db_time(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE messages SET category = ?2, confidence = ?3, provenance = ?4, status = ?5,
                    rule_folder = ?6, rule_auto_delete = ?7, rationale = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                id,
                update.category.as_str(),
                update.confidence,
                update.provenance.to_string(),
                update.status.as_str(),
                update.rule_hint.folder,
                update.rule_hint.auto_delete,
                update.rationale,
                now,
            ],
        )?;
        Ok(())
    })
}

pub fn update_status(
    db: &Database,
    id: i64,
    status: ProcessingStatus,
) -> Result<(), DatabaseError> {
    let now = to_db_time(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE messages SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now],
        )?;
        Ok(())
    })
}

/// Message counts per status for one account.
pub fn count_by_status(
    db: &Database,
    account_id: &str,
) -> Result<BTreeMap<String, i64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM messages WHERE account_id = ?1 GROUP BY status",
        )?;
        let counts = stmt
            .query_map(params![account_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(counts)
    })
}

/// Messages first recorded since a cutoff, across all accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityStats {
    pub since: DateTime<Utc>,
    pub total: i64,
    pub by_category: BTreeMap<String, i64>,
    pub by_status: BTreeMap<String, i64>,
}

pub fn activity_since(db: &Database, since: DateTime<Utc>) -> Result<ActivityStats, DatabaseError> {
    let cutoff = to_db_time(&since);
    db.with_conn(|conn| {
        let grouped = |column: &str| -> rusqlite::Result<BTreeMap<String, i64>> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {column}, COUNT(*) FROM messages WHERE created_at >= ?1 GROUP BY {column}"
            ))?;
            let counts = stmt
                .query_map(params![cutoff], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>();
            counts
        };
        let by_category = grouped("category")?;
        let by_status = grouped("status")?;
        Ok(ActivityStats {
            since,
            total: by_status.values().sum(),
            by_category,
            by_status,
        })
    })
}

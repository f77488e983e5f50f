//! Append-only audit log. Entries are never updated or deleted.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{from_db_time, to_db_time, Database, DatabaseError};
use crate::model::{AuditEntry, AuditOutcome, NewAuditEntry};

struct AuditRow {
    id: i64,
    account_id: String,
    message_ref: String,
    action: String,
    outcome: String,
    details: String,
    component: String,
    created_at: String,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            message_ref: row.get(2)?,
            action: row.get(3)?,
            outcome: row.get(4)?,
            details: row.get(5)?,
            component: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<AuditEntry, DatabaseError> {
        let outcome = AuditOutcome::parse(&self.outcome).ok_or_else(|| DatabaseError::Corrupt {
            table: "audit_log",
            column: "outcome",
            value: self.outcome.clone(),
        })?;
        let details = serde_json::from_str(&self.details).map_err(|_| DatabaseError::Corrupt {
            table: "audit_log",
            column: "details",
            value: self.details.clone(),
        })?;
        Ok(AuditEntry {
            id: self.id,
            account_id: self.account_id,
            message_ref: self.message_ref,
            action: self.action,
            outcome,
            details,
            component: self.component,
            created_at: from_db_time("audit_log", "created_at", &self.created_at)?,
        })
    }
}

/// Appends one entry and returns its row id.
pub fn append(db: &Database, entry: &NewAuditEntry) -> Result<i64, DatabaseError> {
    let now = to_db_time(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO audit_log (account_id, message_ref, action, outcome, details, component, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.account_id,
                entry.message_ref,
                entry.action,
                entry.outcome.as_str(),
                entry.details.to_string(),
                entry.component,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// All entries for one message, oldest first.
pub fn list_for_message(
    db: &Database,
    account_id: &str,
    message_ref: &str,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, account_id, message_ref, action, outcome, details, component, created_at
             FROM audit_log WHERE account_id = ?1 AND message_ref = ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![account_id, message_ref], AuditRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(AuditRow::into_entry).collect()
}

/// All entries for an account, oldest first.
pub fn list_for_account(db: &Database, account_id: &str) -> Result<Vec<AuditEntry>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, account_id, message_ref, action, outcome, details, component, created_at
             FROM audit_log WHERE account_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![account_id], AuditRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(AuditRow::into_entry).collect()
}

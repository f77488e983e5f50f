//! Account repository: enrollment, credential replacement, sync bookkeeping.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{from_db_time, to_db_time, Database, DatabaseError};
use crate::model::{Account, ProviderKind};

const COLUMNS: &str = "id, display_name, provider, credential_blob, last_sync, sync_watermark,
                       last_error, requires_reauth, created_at";

struct AccountRow {
    id: String,
    display_name: String,
    provider: String,
    credential_blob: String,
    last_sync: Option<String>,
    sync_watermark: Option<String>,
    last_error: Option<String>,
    requires_reauth: bool,
    created_at: String,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            provider: row.get(2)?,
            credential_blob: row.get(3)?,
            last_sync: row.get(4)?,
            sync_watermark: row.get(5)?,
            last_error: row.get(6)?,
            requires_reauth: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_account(self) -> Result<Account, DatabaseError> {
        let provider =
            ProviderKind::parse(&self.provider).ok_or_else(|| DatabaseError::Corrupt {
                table: "accounts",
                column: "provider",
                value: self.provider.clone(),
            })?;
        let last_sync = self
            .last_sync
            .as_deref()
            .map(|v| from_db_time("accounts", "last_sync", v))
            .transpose()?;
        let sync_watermark = self
            .sync_watermark
            .as_deref()
            .map(|v| from_db_time("accounts", "sync_watermark", v))
            .transpose()?;

        Ok(Account {
            id: self.id,
            display_name: self.display_name,
            provider,
            credential_blob: self.credential_blob,
            last_sync,
            sync_watermark,
            last_error: self.last_error,
            requires_reauth: self.requires_reauth,
            created_at: from_db_time("accounts", "created_at", &self.created_at)?,
        })
    }
}

/// Enrolls a new account with an already sealed credential blob.
pub fn insert(
    db: &Database,
    id: &str,
    display_name: &str,
    provider: ProviderKind,
    credential_blob: &str,
) -> Result<(), DatabaseError> {
    let now = to_db_time(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO accounts (id, display_name, provider, credential_blob, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, display_name, provider.as_str(), credential_blob, now],
        )?;
        Ok(())
    })
}

pub fn find(db: &Database, id: &str) -> Result<Option<Account>, DatabaseError> {
    let row = db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {} FROM accounts WHERE id = ?1", COLUMNS),
            params![id],
            AccountRow::from_row,
        )
        .optional()
        .map_err(DatabaseError::from)
    })?;
    row.map(AccountRow::into_account).transpose()
}

pub fn list(db: &Database) -> Result<Vec<Account>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM accounts ORDER BY id", COLUMNS))?;
        let rows = stmt
            .query_map([], AccountRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(AccountRow::into_account).collect()
}

/// Persists a refreshed credential blob produced by a pipeline run.
///
/// A single UPDATE: readers see either the old blob or the new one.
pub fn store_refreshed_credentials(
    db: &Database,
    id: &str,
    credential_blob: &str,
) -> Result<(), DatabaseError> {
    update_one(
        db,
        id,
        "UPDATE accounts SET credential_blob = ?2, updated_at = ?3 WHERE id = ?1",
        credential_blob,
    )
}

/// Operator-side credential replacement; re-enables an account flagged for reauth.
pub fn replace_credentials(
    db: &Database,
    id: &str,
    credential_blob: &str,
) -> Result<(), DatabaseError> {
    update_one(
        db,
        id,
        "UPDATE accounts SET credential_blob = ?2, requires_reauth = 0, last_error = NULL,
                updated_at = ?3
         WHERE id = ?1",
        credential_blob,
    )
}

fn update_one(db: &Database, id: &str, sql: &str, value: &str) -> Result<(), DatabaseError> {
    let now = to_db_time(&Utc::now());
    let changed = db.with_conn(|conn| Ok(conn.execute(sql, params![id, value, now])?))?;
    if changed == 0 {
        return Err(DatabaseError::AccountNotFound(id.to_string()));
    }
    Ok(())
}

/// Moves the fetch watermark forward; never backwards.
pub fn advance_watermark(
    db: &Database,
    id: &str,
    watermark: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let value = to_db_time(&watermark);
    let now = to_db_time(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE accounts SET sync_watermark = ?2, updated_at = ?3
             WHERE id = ?1 AND (sync_watermark IS NULL OR sync_watermark < ?2)",
            params![id, value, now],
        )?;
        Ok(())
    })
}

/// Marks a run as fully successful: stamps `last_sync` and clears `last_error`.
pub fn record_sync_success(
    db: &Database,
    id: &str,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let at = to_db_time(&at);
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE accounts SET last_sync = ?2, last_error = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    })
}

/// Records a run-level failure. `requires_reauth` is sticky until credentials are replaced.
pub fn record_error(
    db: &Database,
    id: &str,
    error: &str,
    requires_reauth: bool,
) -> Result<(), DatabaseError> {
    let now = to_db_time(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE accounts SET last_error = ?2,
                    requires_reauth = MAX(requires_reauth, ?3),
                    updated_at = ?4
             WHERE id = ?1",
            params![id, error, requires_reauth, now],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("Failed to create test database");
        insert(&db, "acct-1", "Work", ProviderKind::OAuth2Rest, "blob-v1").unwrap();
        db
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let account = find(&db, "acct-1").unwrap().unwrap();
        assert_eq!(account.display_name, "Work");
        assert_eq!(account.provider, ProviderKind::OAuth2Rest);
        assert_eq!(account.credential_blob, "blob-v1");
        assert!(account.last_sync.is_none());
        assert!(!account.requires_reauth);
        assert!(find(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let db = test_db();
        assert!(insert(&db, "acct-1", "Again", ProviderKind::PasswordImap, "x").is_err());
    }

    #[test]
    fn test_error_flag_is_sticky_until_replace() {
        let db = test_db();
        record_error(&db, "acct-1", "invalid_grant", true).unwrap();
        record_error(&db, "acct-1", "timeout", false).unwrap();

        let account = find(&db, "acct-1").unwrap().unwrap();
        assert!(account.requires_reauth);
        assert_eq!(account.last_error.as_deref(), Some("timeout"));

        store_refreshed_credentials(&db, "acct-1", "blob-v2").unwrap();
        assert!(find(&db, "acct-1").unwrap().unwrap().requires_reauth);

        replace_credentials(&db, "acct-1", "blob-v3").unwrap();
        let account = find(&db, "acct-1").unwrap().unwrap();
        assert!(!account.requires_reauth);
        assert!(account.last_error.is_none());
        assert_eq!(account.credential_blob, "blob-v3");
    }

    #[test]
    fn test_replace_unknown_account() {
        let db = test_db();
        assert!(matches!(
            replace_credentials(&db, "ghost", "blob"),
            Err(DatabaseError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_watermark_only_moves_forward() {
        let db = test_db();
        let t1 = Utc::now();
        let t0 = t1 - chrono::Duration::hours(1);

        advance_watermark(&db, "acct-1", t1).unwrap();
        advance_watermark(&db, "acct-1", t0).unwrap();

        let account = find(&db, "acct-1").unwrap().unwrap();
        let stored = account.sync_watermark.unwrap();
        assert_eq!(to_db_time(&stored), to_db_time(&t1));
    }

    #[test]
    fn test_sync_success_clears_error() {
        let db = test_db();
        record_error(&db, "acct-1", "boom", false).unwrap();
        record_sync_success(&db, "acct-1", Utc::now()).unwrap();
        let account = find(&db, "acct-1").unwrap().unwrap();
        assert!(account.last_error.is_none());
        assert!(account.last_sync.is_some());
    }
}

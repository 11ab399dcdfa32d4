//! Append-only XP ledger
//!
//! The only writer of XP truth; everything else derives from it. Appends are
//! idempotent: the UNIQUE constraint on `idempotency_key` turns a retried
//! award into a fetch of the originally recorded event, so callers treat
//! duplicates as success.

use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use super::db::{ProgressDb, now_ms};
use super::models::{AppendOutcome, NewXpEvent, XpEvent, XpReason};
use crate::error::{ProgressError, Result};

/// Reads and writes the `xp_events` table
#[derive(Clone)]
pub struct XpLedger {
    db: ProgressDb,
}

impl XpLedger {
    pub fn new(db: ProgressDb) -> Self {
        Self { db }
    }

    /// Append an event, or return the existing one for a reused key
    pub fn append(&self, event: NewXpEvent) -> Result<AppendOutcome> {
        if event.user_id.is_empty() {
            return Err(ProgressError::Validation("user_id is empty".into()));
        }
        if event.idempotency_key.is_empty() {
            return Err(ProgressError::Validation("idempotency_key is empty".into()));
        }
        let conn = self.db.conn();
        Self::append_tx(&conn, &event)
    }

    /// Sum of all ledger amounts for a user
    pub fn sum_for_user(&self, user_id: &str) -> Result<i64> {
        let conn = self.db.conn();
        Self::sum_for_user_tx(&conn, user_id)
    }

    /// Most recent events for a user, newest first
    pub fn recent_for_user(&self, user_id: &str, limit: u32) -> Result<Vec<XpEvent>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount, reason, lesson_id, course_id, idempotency_key, created_at
             FROM xp_events WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let events = stmt
            .query_map(params![user_id, limit], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub(crate) fn append_tx(conn: &Connection, event: &NewXpEvent) -> Result<AppendOutcome> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_ms();
        let changed = conn.execute(
            r#"INSERT INTO xp_events
               (id, user_id, amount, reason, lesson_id, course_id, idempotency_key, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(idempotency_key) DO NOTHING"#,
            params![
                id,
                event.user_id,
                event.amount,
                event.reason.as_str(),
                event.lesson_id,
                event.course_id,
                event.idempotency_key,
                created_at,
            ],
        )?;

        if changed == 0 {
            // The conflicting row is the original award for this key
            let existing = conn.query_row(
                "SELECT id, user_id, amount, reason, lesson_id, course_id, idempotency_key, created_at
                 FROM xp_events WHERE idempotency_key = ?1",
                params![event.idempotency_key],
                event_from_row,
            )?;
            return Ok(AppendOutcome::Duplicate(existing));
        }

        Ok(AppendOutcome::Appended(XpEvent {
            id,
            user_id: event.user_id.clone(),
            amount: event.amount,
            reason: event.reason,
            lesson_id: event.lesson_id.clone(),
            course_id: event.course_id.clone(),
            idempotency_key: event.idempotency_key.clone(),
            created_at,
        }))
    }

    pub(crate) fn sum_for_user_tx(conn: &Connection, user_id: &str) -> Result<i64> {
        let sum: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM xp_events WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        Ok(sum)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<XpEvent> {
    let reason: String = row.get(3)?;
    Ok(XpEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        reason: XpReason::parse(&reason).unwrap_or(XpReason::ManualAward),
        lesson_id: row.get(4)?,
        course_id: row.get(5)?,
        idempotency_key: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ledger() -> XpLedger {
        XpLedger::new(ProgressDb::open_in_memory().unwrap())
    }

    fn award(user: &str, amount: i64, key: &str) -> NewXpEvent {
        NewXpEvent {
            user_id: user.to_string(),
            amount,
            reason: XpReason::ManualAward,
            lesson_id: None,
            course_id: None,
            idempotency_key: key.to_string(),
        }
    }

    #[test]
    fn test_append_and_sum() {
        let ledger = test_ledger();
        ledger.append(award("u1", 50, "u1:a")).unwrap();
        ledger.append(award("u1", 30, "u1:b")).unwrap();
        ledger.append(award("u2", 10, "u2:a")).unwrap();

        assert_eq!(ledger.sum_for_user("u1").unwrap(), 80);
        assert_eq!(ledger.sum_for_user("u2").unwrap(), 10);
        assert_eq!(ledger.sum_for_user("nobody").unwrap(), 0);
    }

    #[test]
    fn test_reused_key_returns_original_event() {
        let ledger = test_ledger();
        let first = ledger.append(award("u1", 50, "u1:a")).unwrap();
        assert!(!first.is_duplicate());

        // Retry with the same key but a different amount: nothing is written
        let second = ledger.append(award("u1", 999, "u1:a")).unwrap();
        assert!(second.is_duplicate());
        assert_eq!(second.event().amount, 50);
        assert_eq!(second.event().id, first.event().id);
        assert_eq!(ledger.sum_for_user("u1").unwrap(), 50);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let ledger = test_ledger();
        for i in 0..5 {
            ledger.append(award("u1", i, &format!("u1:{i}"))).unwrap();
        }
        let recent = ledger.recent_for_user("u1", 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].created_at >= recent[2].created_at);
    }

    #[test]
    fn test_empty_ids_rejected() {
        let ledger = test_ledger();
        assert!(ledger.append(award("", 1, "k")).is_err());
        assert!(ledger.append(award("u1", 1, "")).is_err());
    }
}

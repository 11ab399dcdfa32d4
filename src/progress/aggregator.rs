//! Progression aggregator
//!
//! Derives total XP and level from the ledger, detects level-up transitions
//! and keeps the `progression_state` cache in step. The cache is a
//! convenience; the ledger sum is always the truth, and `reconcile` repairs
//! any drift between them.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::db::{ProgressDb, now_ms};
use super::ledger::XpLedger;
use super::levels::Level;
use super::models::{AppendOutcome, AwardResult, NewXpEvent, ProgressionState, XpReason};
use crate::error::{ProgressError, Result};

#[derive(Clone)]
pub struct ProgressionAggregator {
    db: ProgressDb,
}

impl ProgressionAggregator {
    pub fn new(db: ProgressDb) -> Self {
        Self { db }
    }

    /// Record an award in the ledger and update the derived level state
    ///
    /// Reusing an idempotency key returns the state as-is with
    /// `xp_earned = 0`; the original award stands.
    pub fn apply_award(&self, event: NewXpEvent) -> Result<AwardResult> {
        if event.user_id.is_empty() {
            return Err(ProgressError::Validation("user_id is empty".into()));
        }
        if event.idempotency_key.is_empty() {
            return Err(ProgressError::Validation("idempotency_key is empty".into()));
        }
        let conn = self.db.conn();
        let tx = conn.unchecked_transaction()?;
        let result = Self::apply_award_tx(&tx, event)?;
        tx.commit()?;
        Ok(result)
    }

    /// Current cached state for a user (empty state if none recorded yet)
    pub fn state(&self, user_id: &str) -> Result<ProgressionState> {
        let conn = self.db.conn();
        Self::state_tx(&conn, user_id)
    }

    /// Compare the cached total against the ledger sum
    ///
    /// Returns `ProgressError::Consistency` on drift without repairing it;
    /// the reconciliation job uses this to decide what to log.
    pub fn check_consistency(&self, user_id: &str) -> Result<()> {
        let conn = self.db.conn();
        let ledger_sum = XpLedger::sum_for_user_tx(&conn, user_id)?;
        let cached = Self::state_tx(&conn, user_id)?.total_xp;
        if ledger_sum != cached {
            return Err(ProgressError::Consistency {
                user_id: user_id.to_string(),
                ledger_sum,
                cached,
            });
        }
        Ok(())
    }

    /// Recompute the cache from the ledger; returns true when drift was repaired
    ///
    /// The ledger is never edited - repair always rewrites the cache.
    pub fn reconcile(&self, user_id: &str) -> Result<bool> {
        let conn = self.db.conn();
        let tx = conn.unchecked_transaction()?;
        let ledger_sum = XpLedger::sum_for_user_tx(&tx, user_id)?;
        let cached = Self::state_tx(&tx, user_id)?;
        if ledger_sum == cached.total_xp {
            return Ok(false);
        }
        warn!(
            user = user_id,
            ledger_sum,
            cached = cached.total_xp,
            "progression cache drifted from ledger, repairing"
        );
        Self::write_state_tx(&tx, user_id, ledger_sum, Level::for_xp(ledger_sum).level)?;
        tx.commit()?;
        Ok(true)
    }

    /// Reconcile every user that has ledger entries or cached state
    pub fn reconcile_all(&self) -> Result<usize> {
        let users: Vec<String> = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(
                "SELECT user_id FROM xp_events
                 UNION SELECT user_id FROM progression_state",
            )?;
            let ids = stmt
                .query_map([], |r| r.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let mut repaired = 0;
        for user_id in users {
            if self.reconcile(&user_id)? {
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    pub(crate) fn apply_award_tx(conn: &Connection, event: NewXpEvent) -> Result<AwardResult> {
        let user_id = event.user_id.clone();
        let amount = event.amount;

        match XpLedger::append_tx(conn, &event)? {
            AppendOutcome::Duplicate(_) => {
                let state = Self::state_tx(conn, &user_id)?;
                Ok(AwardResult {
                    new_total_xp: state.total_xp,
                    old_level: state.level,
                    new_level: state.level,
                    leveled_up: false,
                    xp_earned: 0,
                    duplicate: true,
                })
            }
            AppendOutcome::Appended(_) => {
                // SUM over the ledger, not cache + amount: commutative over
                // any interleaving of concurrent awards
                let total = XpLedger::sum_for_user_tx(conn, &user_id)?;
                let old_level = Level::for_xp(total - amount).level;
                let new_level = Level::for_xp(total).level;
                Self::write_state_tx(conn, &user_id, total, new_level)?;

                let leveled_up = new_level > old_level;
                if leveled_up {
                    debug!(user = user_id, old_level, new_level, "level up");
                    // Zero-amount marker so feeds and audits show the transition
                    XpLedger::append_tx(
                        conn,
                        &NewXpEvent {
                            user_id: user_id.clone(),
                            amount: 0,
                            reason: XpReason::LevelUp,
                            lesson_id: None,
                            course_id: None,
                            idempotency_key: format!("{user_id}:level:{new_level}"),
                        },
                    )?;
                }

                Ok(AwardResult {
                    new_total_xp: total,
                    old_level,
                    new_level,
                    leveled_up,
                    xp_earned: amount,
                    duplicate: false,
                })
            }
        }
    }

    pub(crate) fn state_tx(conn: &Connection, user_id: &str) -> Result<ProgressionState> {
        let state = conn
            .query_row(
                "SELECT total_xp, level, updated_at FROM progression_state WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok(ProgressionState {
                        user_id: user_id.to_string(),
                        total_xp: r.get(0)?,
                        level: r.get(1)?,
                        updated_at: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or_else(|| ProgressionState::empty(user_id)))
    }

    fn write_state_tx(conn: &Connection, user_id: &str, total_xp: i64, level: u32) -> Result<()> {
        conn.execute(
            r#"INSERT INTO progression_state (user_id, total_xp, level, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(user_id) DO UPDATE SET
                   total_xp = ?2, level = ?3, updated_at = ?4"#,
            params![user_id, total_xp, level, now_ms()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_aggregator() -> ProgressionAggregator {
        ProgressionAggregator::new(ProgressDb::open_in_memory().unwrap())
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
    fn test_award_updates_state() {
        let agg = test_aggregator();
        let result = agg.apply_award(award("u1", 50, "u1:a")).unwrap();
        assert_eq!(result.new_total_xp, 50);
        assert_eq!(result.new_level, 1);
        assert!(!result.leveled_up);

        let state = agg.state("u1").unwrap();
        assert_eq!(state.total_xp, 50);
        assert_eq!(state.level, 1);
    }

    #[test]
    fn test_level_up_appends_marker_event() {
        let agg = test_aggregator();
        agg.apply_award(award("u1", 60, "u1:a")).unwrap();
        // Crosses the 100 XP threshold for level 2
        let result = agg.apply_award(award("u1", 60, "u1:b")).unwrap();
        assert!(result.leveled_up);
        assert_eq!(result.old_level, 1);
        assert_eq!(result.new_level, 2);

        let ledger = XpLedger::new(agg.db.clone());
        let events = ledger.recent_for_user("u1", 10).unwrap();
        let markers: Vec<_> = events
            .iter()
            .filter(|e| e.reason == XpReason::LevelUp)
            .collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].amount, 0);
        // Marker contributes nothing to the total
        assert_eq!(agg.state("u1").unwrap().total_xp, 120);
    }

    #[test]
    fn test_duplicate_award_earns_nothing() {
        let agg = test_aggregator();
        agg.apply_award(award("u1", 150, "u1:a")).unwrap();
        let result = agg.apply_award(award("u1", 150, "u1:a")).unwrap();
        assert!(result.duplicate);
        assert_eq!(result.xp_earned, 0);
        assert_eq!(result.new_total_xp, 150);
        assert!(!result.leveled_up);
    }

    #[test]
    fn test_reconcile_repairs_corrupted_cache() {
        let agg = test_aggregator();
        agg.apply_award(award("u1", 300, "u1:a")).unwrap();

        // Corrupt the cache behind the aggregator's back
        {
            let conn = agg.db.conn();
            conn.execute(
                "UPDATE progression_state SET total_xp = 9999, level = 19 WHERE user_id = 'u1'",
                [],
            )
            .unwrap();
        }
        assert!(agg.check_consistency("u1").is_err());

        assert!(agg.reconcile("u1").unwrap());
        assert!(agg.check_consistency("u1").is_ok());
        let state = agg.state("u1").unwrap();
        assert_eq!(state.total_xp, 300);
        assert_eq!(state.level, 3);

        // Second pass finds nothing to do
        assert!(!agg.reconcile("u1").unwrap());
    }

    #[test]
    fn test_reconcile_all_counts_repairs() {
        let agg = test_aggregator();
        agg.apply_award(award("u1", 10, "u1:a")).unwrap();
        agg.apply_award(award("u2", 20, "u2:a")).unwrap();
        {
            let conn = agg.db.conn();
            conn.execute("UPDATE progression_state SET total_xp = 1 WHERE user_id = 'u2'", [])
                .unwrap();
        }
        assert_eq!(agg.reconcile_all().unwrap(), 1);
    }
}

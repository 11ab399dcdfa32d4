//! Badge rule engine
//!
//! Evaluates the declarative badge catalog against derived aggregates and
//! grants idempotently. The (user, badge) primary key is the only guard:
//! concurrent duplicate evaluation collapses to a single grant row, with the
//! loser seeing `AlreadyGranted` instead of an error.

mod definitions;

pub use definitions::{BADGES, Badge, BadgeCategory, BadgeId};

use rusqlite::{Connection, params};
use tracing::debug;

use super::aggregator::ProgressionAggregator;
use super::db::{ProgressDb, now_ms};
use super::models::{BadgeGrant, GrantOutcome, UserStats};
use super::streaks::StreakTracker;
use crate::error::Result;

#[derive(Clone)]
pub struct BadgeEngine {
    db: ProgressDb,
}

impl BadgeEngine {
    pub fn new(db: ProgressDb) -> Self {
        Self { db }
    }

    /// Evaluate every badge predicate for a user and grant the new ones
    ///
    /// Returns the ids granted by this call (empty on re-evaluation).
    pub fn evaluate(&self, user_id: &str, stats: &UserStats) -> Result<Vec<BadgeId>> {
        let conn = self.db.conn();
        Self::evaluate_tx(&conn, user_id, stats)
    }

    /// Grant a single badge; `AlreadyGranted` on repeat
    pub fn grant(&self, user_id: &str, badge_id: BadgeId) -> Result<GrantOutcome> {
        let conn = self.db.conn();
        Self::grant_tx(&conn, user_id, badge_id)
    }

    /// All grants for a user, newest first
    pub fn grants_for_user(&self, user_id: &str) -> Result<Vec<BadgeGrant>> {
        let conn = self.db.conn();
        Self::grants_for_user_tx(&conn, user_id)
    }

    /// Build the aggregates badge predicates read
    ///
    /// Everything comes from already-derived tables; nothing is recomputed
    /// from the raw ledger here.
    pub fn stats_for_user(&self, user_id: &str) -> Result<UserStats> {
        let conn = self.db.conn();
        Self::stats_tx(&conn, user_id)
    }

    pub(crate) fn evaluate_tx(
        conn: &Connection,
        user_id: &str,
        stats: &UserStats,
    ) -> Result<Vec<BadgeId>> {
        let mut newly_granted = Vec::new();
        for badge in BADGES {
            if !(badge.predicate)(stats) {
                continue;
            }
            if Self::grant_tx(conn, user_id, badge.id)? == GrantOutcome::Granted {
                debug!(user = user_id, badge = badge.id.as_str(), "badge granted");
                newly_granted.push(badge.id);
            }
        }
        Ok(newly_granted)
    }

    pub(crate) fn grant_tx(
        conn: &Connection,
        user_id: &str,
        badge_id: BadgeId,
    ) -> Result<GrantOutcome> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO badge_grants (user_id, badge_id, earned_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, badge_id.as_str(), now_ms()],
        )?;
        Ok(if changed > 0 {
            GrantOutcome::Granted
        } else {
            GrantOutcome::AlreadyGranted
        })
    }

    pub(crate) fn grants_for_user_tx(conn: &Connection, user_id: &str) -> Result<Vec<BadgeGrant>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, badge_id, earned_at FROM badge_grants
             WHERE user_id = ?1 ORDER BY earned_at DESC",
        )?;
        let grants = stmt
            .query_map(params![user_id], |r| {
                Ok(BadgeGrant {
                    user_id: r.get(0)?,
                    badge_id: r.get(1)?,
                    earned_at: r.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(grants)
    }

    pub(crate) fn stats_tx(conn: &Connection, user_id: &str) -> Result<UserStats> {
        let state = ProgressionAggregator::state_tx(conn, user_id)?;
        let streak = StreakTracker::state_tx(conn, user_id)?;

        let lessons_completed: u32 = conn.query_row(
            "SELECT COUNT(*) FROM lesson_progress
             WHERE user_id = ?1 AND status = 'completed'",
            params![user_id],
            |r| r.get(0),
        )?;
        let courses_completed: u32 = conn.query_row(
            "SELECT COUNT(*) FROM certificates WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;

        Ok(UserStats {
            total_xp: state.total_xp,
            level: state.level,
            lessons_completed,
            courses_completed,
            current_streak: streak.current_streak,
            longest_streak: streak.longest_streak,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> BadgeEngine {
        BadgeEngine::new(ProgressDb::open_in_memory().unwrap())
    }

    #[test]
    fn test_grant_is_write_once() {
        let engine = test_engine();
        assert_eq!(
            engine.grant("u1", BadgeId::FirstLesson).unwrap(),
            GrantOutcome::Granted
        );
        assert_eq!(
            engine.grant("u1", BadgeId::FirstLesson).unwrap(),
            GrantOutcome::AlreadyGranted
        );

        let grants = engine.grants_for_user("u1").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].badge_id, "first_lesson");
    }

    #[test]
    fn test_evaluate_grants_only_new() {
        let engine = test_engine();
        let stats = UserStats {
            lessons_completed: 12,
            current_streak: 3,
            level: 1,
            ..Default::default()
        };

        let first = engine.evaluate("u1", &stats).unwrap();
        assert!(first.contains(&BadgeId::FirstLesson));
        assert!(first.contains(&BadgeId::TenLessons));
        assert!(first.contains(&BadgeId::Streak3));
        assert!(!first.contains(&BadgeId::FiftyLessons));

        // Re-evaluation with the same stats grants nothing
        let second = engine.evaluate("u1", &stats).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_concurrent_duplicate_evaluation_single_row() {
        let engine = test_engine();
        let stats = UserStats {
            lessons_completed: 1,
            ..Default::default()
        };

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                engine.evaluate("u1", &stats).unwrap()
            }));
        }
        let granted: usize = handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap()
                    .iter()
                    .filter(|id| **id == BadgeId::FirstLesson)
                    .count()
            })
            .sum();

        assert_eq!(granted, 1);
        assert_eq!(engine.grants_for_user("u1").unwrap().len(), 1);
    }
}

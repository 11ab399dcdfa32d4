//! Streak tracking
//!
//! Consecutive-day activity streaks. All comparisons happen on calendar
//! dates in the user's own day, never on raw instants - callers convert an
//! instant with [`local_date`] before recording. A streak counts a day at
//! most once, resets after a gap of more than one day and never rewinds.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::aggregator::ProgressionAggregator;
use super::db::{ProgressDb, now_ms};
use super::levels::XpRewards;
use super::models::{NewXpEvent, StreakState, XpReason};
use crate::error::{ProgressError, Result};

/// Format used for `last_activity_date` storage
const DATE_FMT: &str = "%Y-%m-%d";

/// Convert a UTC instant to the user's calendar date
///
/// `offset_minutes` is the user's UTC offset (e.g. -300 for UTC-5).
pub fn local_date(instant: DateTime<Utc>, offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    instant.with_timezone(&offset).date_naive()
}

#[derive(Clone)]
pub struct StreakTracker {
    db: ProgressDb,
}

impl StreakTracker {
    pub fn new(db: ProgressDb) -> Self {
        Self { db }
    }

    /// Record activity on a calendar day and return the updated streak
    ///
    /// The first activity of a new day also appends a small daily-activity
    /// XP award, keyed per day so retries never double-pay.
    pub fn record_activity(&self, user_id: &str, date: NaiveDate) -> Result<StreakState> {
        if user_id.is_empty() {
            return Err(ProgressError::Validation("user_id is empty".into()));
        }
        let conn = self.db.conn();
        let tx = conn.unchecked_transaction()?;
        let state = Self::record_tx(&tx, user_id, date)?;
        tx.commit()?;
        Ok(state)
    }

    /// Current streak for a user
    pub fn get(&self, user_id: &str) -> Result<StreakState> {
        let conn = self.db.conn();
        Self::state_tx(&conn, user_id)
    }

    pub(crate) fn record_tx(conn: &Connection, user_id: &str, date: NaiveDate) -> Result<StreakState> {
        let prev = Self::state_tx(conn, user_id)?;
        let date_str = date.format(DATE_FMT).to_string();

        let new_current = match prev.last_date() {
            Some(last) => {
                let gap = date.signed_duration_since(last).num_days();
                if gap <= 0 {
                    // Same day already counted, or backdated activity:
                    // streaks never rewind
                    return Ok(prev);
                }
                if gap == 1 { prev.current_streak + 1 } else { 1 }
            }
            None => 1,
        };
        let new_longest = new_current.max(prev.longest_streak);

        conn.execute(
            r#"INSERT INTO streak_state
               (user_id, current_streak, longest_streak, last_activity_date, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(user_id) DO UPDATE SET
                   current_streak = ?2, longest_streak = ?3,
                   last_activity_date = ?4, updated_at = ?5"#,
            params![user_id, new_current, new_longest, date_str, now_ms()],
        )?;
        debug!(user = user_id, streak = new_current, day = %date_str, "streak advanced");

        ProgressionAggregator::apply_award_tx(
            conn,
            NewXpEvent {
                user_id: user_id.to_string(),
                amount: XpRewards::DAILY_ACTIVITY,
                reason: XpReason::DailyActivity,
                lesson_id: None,
                course_id: None,
                idempotency_key: format!("{user_id}:{date_str}:daily"),
            },
        )?;

        Ok(StreakState {
            current_streak: new_current,
            longest_streak: new_longest,
            last_activity_date: Some(date_str),
        })
    }

    pub(crate) fn state_tx(conn: &Connection, user_id: &str) -> Result<StreakState> {
        let state = conn
            .query_row(
                "SELECT current_streak, longest_streak, last_activity_date
                 FROM streak_state WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok(StreakState {
                        current_streak: r.get(0)?,
                        longest_streak: r.get(1)?,
                        last_activity_date: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tracker() -> StreakTracker {
        StreakTracker::new(ProgressDb::open_in_memory().unwrap())
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_consecutive_days_extend() {
        let tracker = test_tracker();
        tracker.record_activity("u1", day("2026-03-01")).unwrap();
        tracker.record_activity("u1", day("2026-03-02")).unwrap();
        let state = tracker.record_activity("u1", day("2026-03-03")).unwrap();
        assert_eq!(state.current_streak, 3);
        assert_eq!(state.longest_streak, 3);
    }

    #[test]
    fn test_gap_resets_but_keeps_longest() {
        let tracker = test_tracker();
        tracker.record_activity("u1", day("2026-03-01")).unwrap();
        tracker.record_activity("u1", day("2026-03-02")).unwrap();
        let state = tracker.record_activity("u1", day("2026-03-06")).unwrap();
        assert_eq!(state.current_streak, 1);
        assert_eq!(state.longest_streak, 2);
    }

    #[test]
    fn test_same_day_counts_once() {
        let tracker = test_tracker();
        tracker.record_activity("u1", day("2026-03-01")).unwrap();
        let state = tracker.record_activity("u1", day("2026-03-01")).unwrap();
        assert_eq!(state.current_streak, 1);
        assert_eq!(state.last_activity_date.as_deref(), Some("2026-03-01"));
    }

    #[test]
    fn test_backdated_activity_never_rewinds() {
        let tracker = test_tracker();
        tracker.record_activity("u1", day("2026-03-01")).unwrap();
        tracker.record_activity("u1", day("2026-03-02")).unwrap();
        let state = tracker.record_activity("u1", day("2026-02-20")).unwrap();
        assert_eq!(state.current_streak, 2);
        assert_eq!(state.last_activity_date.as_deref(), Some("2026-03-02"));
    }

    #[test]
    fn test_daily_bonus_awarded_once_per_day() {
        let tracker = test_tracker();
        tracker.record_activity("u1", day("2026-03-01")).unwrap();
        tracker.record_activity("u1", day("2026-03-01")).unwrap();
        tracker.record_activity("u1", day("2026-03-02")).unwrap();

        let agg = ProgressionAggregator::new(tracker.db.clone());
        assert_eq!(
            agg.state("u1").unwrap().total_xp,
            2 * XpRewards::DAILY_ACTIVITY
        );
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        // 2026-03-02 01:30 UTC is still 2026-03-01 in UTC-5
        let instant = day("2026-03-02").and_hms_opt(1, 30, 0).unwrap().and_utc();
        assert_eq!(local_date(instant, -300), day("2026-03-01"));
        assert_eq!(local_date(instant, 0), day("2026-03-02"));
    }
}

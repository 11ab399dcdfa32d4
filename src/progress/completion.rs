//! Lesson completion state machine
//!
//! `not_started -> in_progress -> completed`, forward only; `completed` is
//! terminal. Completion is the one place where several facts change
//! together - lesson marked complete, XP awarded, course rolled up,
//! certificate and badges considered - so everything runs in a single
//! transaction. Idempotency comes from the ledger key
//! `"{user}:{lesson}:completed"`, not from a status pre-check, which closes
//! the race between checking and writing.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::aggregator::ProgressionAggregator;
use super::badges::BadgeEngine;
use super::certificates::CertificateIssuer;
use super::db::{ProgressDb, now_ms};
use super::models::{
    CompletionOutcome, CourseProgress, LessonProgress, LessonStatus, NewXpEvent, XpReason,
};
use super::streaks::StreakTracker;
use crate::catalog::ContentCatalog;
use crate::error::{ProgressError, Result};

#[derive(Clone)]
pub struct CompletionTracker {
    db: ProgressDb,
    catalog: Arc<dyn ContentCatalog>,
}

impl CompletionTracker {
    pub fn new(db: ProgressDb, catalog: Arc<dyn ContentCatalog>) -> Self {
        Self { db, catalog }
    }

    /// Mark a lesson as started; no-op when already started or completed
    pub fn start(&self, user_id: &str, lesson_id: &str) -> Result<LessonProgress> {
        validate_ids(user_id, lesson_id)?;
        let info = self
            .catalog
            .lesson(lesson_id)
            .ok_or_else(|| ProgressError::not_found("lesson", lesson_id))?;

        let conn = self.db.conn();
        conn.execute(
            r#"INSERT INTO lesson_progress
               (user_id, lesson_id, course_id, status, started_at)
               VALUES (?1, ?2, ?3, 'in_progress', ?4)
               ON CONFLICT(user_id, lesson_id) DO NOTHING"#,
            params![user_id, lesson_id, info.course_id, now_ms()],
        )?;

        Self::get_tx(&conn, user_id, lesson_id)?
            .ok_or_else(|| ProgressError::not_found("lesson", lesson_id))
    }

    /// Complete a lesson, with all follow-on effects, as of the given
    /// calendar day
    ///
    /// Re-completing an already-completed lesson returns the current state
    /// with `already_completed = true` and grants nothing - expected traffic
    /// from retries, not an error.
    pub fn complete(
        &self,
        user_id: &str,
        lesson_id: &str,
        activity_date: NaiveDate,
    ) -> Result<CompletionOutcome> {
        validate_ids(user_id, lesson_id)?;
        let info = self
            .catalog
            .lesson(lesson_id)
            .ok_or_else(|| ProgressError::not_found("lesson", lesson_id))?;
        let course_lessons = self.catalog.lessons_for_course(&info.course_id);

        let conn = self.db.conn();
        let tx = conn.unchecked_transaction()?;

        // The ledger append is the idempotency gate for the whole operation
        let award = ProgressionAggregator::apply_award_tx(
            &tx,
            NewXpEvent {
                user_id: user_id.to_string(),
                amount: info.xp_reward,
                reason: XpReason::LessonCompleted,
                lesson_id: Some(lesson_id.to_string()),
                course_id: Some(info.course_id.clone()),
                idempotency_key: format!("{user_id}:{lesson_id}:completed"),
            },
        )?;
        let already_completed = award.duplicate;

        let mut new_badges = Vec::new();
        let mut certificate = None;
        if !already_completed {
            Self::mark_completed_tx(&tx, user_id, lesson_id, &info.course_id)?;
            StreakTracker::record_tx(&tx, user_id, activity_date)?;
        }

        let course_progress =
            Self::course_progress_tx(&tx, user_id, &info.course_id, course_lessons.len() as u32)?;

        if !already_completed {
            if course_progress.is_complete {
                if let Some((cert, newly_issued)) =
                    CertificateIssuer::issue_tx(&tx, user_id, &info.course_id, &course_progress)?
                {
                    if newly_issued {
                        certificate = Some(cert);
                    }
                }
            }

            // Badges see the post-completion aggregates, certificate included
            let stats = BadgeEngine::stats_tx(&tx, user_id)?;
            new_badges = BadgeEngine::evaluate_tx(&tx, user_id, &stats)?
                .into_iter()
                .map(|id| id.as_str().to_string())
                .collect();

            debug!(
                user = user_id,
                lesson = lesson_id,
                xp = award.xp_earned,
                course_complete = course_progress.is_complete,
                "lesson completed"
            );
        }

        let streak = StreakTracker::state_tx(&tx, user_id)?;
        // Re-read after the daily-activity bonus so the reported total and
        // level cover everything this transaction wrote
        let final_state = ProgressionAggregator::state_tx(&tx, user_id)?;
        tx.commit()?;

        Ok(CompletionOutcome {
            xp_earned: award.xp_earned,
            new_total_xp: final_state.total_xp,
            new_level: final_state.level,
            leveled_up: !already_completed && final_state.level > award.old_level,
            already_completed,
            course_progress,
            streak,
            new_badges,
            certificate,
        })
    }

    /// Completion state of a single lesson
    pub fn lesson_progress(&self, user_id: &str, lesson_id: &str) -> Result<LessonProgress> {
        validate_ids(user_id, lesson_id)?;
        let info = self
            .catalog
            .lesson(lesson_id)
            .ok_or_else(|| ProgressError::not_found("lesson", lesson_id))?;

        let conn = self.db.conn();
        Ok(Self::get_tx(&conn, user_id, lesson_id)?.unwrap_or(LessonProgress {
            user_id: user_id.to_string(),
            lesson_id: lesson_id.to_string(),
            course_id: info.course_id,
            status: LessonStatus::NotStarted,
            started_at: None,
            completed_at: None,
        }))
    }

    /// Rollup for one course
    pub fn course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress> {
        if user_id.is_empty() {
            return Err(ProgressError::Validation("user_id is empty".into()));
        }
        let lessons = self.catalog.lessons_for_course(course_id);
        if lessons.is_empty() {
            return Err(ProgressError::not_found("course", course_id));
        }
        let conn = self.db.conn();
        Self::course_progress_tx(&conn, user_id, course_id, lessons.len() as u32)
    }

    fn mark_completed_tx(
        conn: &Connection,
        user_id: &str,
        lesson_id: &str,
        course_id: &str,
    ) -> Result<()> {
        let now = now_ms();
        conn.execute(
            r#"INSERT INTO lesson_progress
               (user_id, lesson_id, course_id, status, started_at, completed_at)
               VALUES (?1, ?2, ?3, 'completed', ?4, ?4)
               ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                   status = 'completed',
                   completed_at = COALESCE(completed_at, ?4)
               WHERE status != 'completed'"#,
            params![user_id, lesson_id, course_id, now],
        )?;
        Ok(())
    }

    pub(crate) fn course_progress_tx(
        conn: &Connection,
        user_id: &str,
        course_id: &str,
        total_lessons: u32,
    ) -> Result<CourseProgress> {
        let completed: u32 = conn.query_row(
            "SELECT COUNT(*) FROM lesson_progress
             WHERE user_id = ?1 AND course_id = ?2 AND status = 'completed'",
            params![user_id, course_id],
            |r| r.get(0),
        )?;
        Ok(CourseProgress::new(course_id, completed, total_lessons))
    }

    fn get_tx(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<Option<LessonProgress>> {
        let progress = conn
            .query_row(
                "SELECT user_id, lesson_id, course_id, status, started_at, completed_at
                 FROM lesson_progress WHERE user_id = ?1 AND lesson_id = ?2",
                params![user_id, lesson_id],
                |r| {
                    let status: String = r.get(3)?;
                    Ok(LessonProgress {
                        user_id: r.get(0)?,
                        lesson_id: r.get(1)?,
                        course_id: r.get(2)?,
                        status: LessonStatus::parse(&status).unwrap_or(LessonStatus::NotStarted),
                        started_at: r.get(4)?,
                        completed_at: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(progress)
    }
}

/// Today's UTC calendar date; callers with a user timezone should prefer
/// [`super::streaks::local_date`]
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

fn validate_ids(user_id: &str, lesson_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(ProgressError::Validation("user_id is empty".into()));
    }
    if lesson_id.is_empty() {
        return Err(ProgressError::Validation("lesson_id is empty".into()));
    }
    Ok(())
}

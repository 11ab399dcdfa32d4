//! Progression tracking module
//!
//! Records XP-earning events in an append-only ledger and derives level,
//! streak, badge and course-completion state from them.
//!
//! # Architecture
//!
//! ```text
//! complete_lesson / record_daily_activity / award_xp
//!                      │
//!                      ▼
//!              ┌───────────────┐      derived state
//!              │   XP ledger   │──▶ levels · streaks ──▶ badges
//!              │ (append-only) │      course rollups ──▶ certificates
//!              └───────────────┘
//! ```
//!
//! One-time side effects are gated by uniqueness constraints (idempotency
//! key, (user, badge), (user, course)), so duplicate and concurrent requests
//! collapse to a single durable outcome.
//!
//! # Usage
//!
//! ```ignore
//! let progress = ProgressManager::open(&path, Arc::new(catalog))?;
//! let outcome = progress.complete_lesson("user-1", "lesson-1")?;
//! let snapshot = progress.snapshot("user-1")?;
//! ```

mod aggregator;
mod badges;
mod certificates;
mod completion;
mod db;
mod ledger;
mod levels;
mod models;
mod streaks;

pub use aggregator::ProgressionAggregator;
pub use badges::{BADGES, Badge, BadgeCategory, BadgeEngine, BadgeId};
pub use certificates::CertificateIssuer;
pub use completion::{CompletionTracker, today_utc};
pub use db::ProgressDb;
pub use ledger::XpLedger;
pub use levels::{LEVELS, Level, XpRewards};
pub use models::{
    AppendOutcome, AwardResult, BadgeGrant, Certificate, CompletionOutcome, CourseProgress,
    GrantOutcome, LessonProgress, LessonStatus, NewXpEvent, ProgressionSnapshot, ProgressionState,
    StreakState, UserStats, XpEvent, XpReason,
};
pub use streaks::{StreakTracker, local_date};

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::catalog::ContentCatalog;
use crate::error::Result;

/// Central entry point for all progression operations
///
/// Thread-safe; clones share the same database handle.
#[derive(Clone)]
pub struct ProgressManager {
    db: ProgressDb,
    catalog: Arc<dyn ContentCatalog>,
}

impl ProgressManager {
    /// Open or create the progression database at `path`
    pub fn open(path: &Path, catalog: Arc<dyn ContentCatalog>) -> anyhow::Result<Self> {
        Ok(Self {
            db: ProgressDb::open(path)?,
            catalog,
        })
    }

    /// In-memory instance for tests and demos
    pub fn open_in_memory(catalog: Arc<dyn ContentCatalog>) -> anyhow::Result<Self> {
        Ok(Self {
            db: ProgressDb::open_in_memory()?,
            catalog,
        })
    }

    // Component accessors, for callers that need more than the facade

    pub fn ledger(&self) -> XpLedger {
        XpLedger::new(self.db.clone())
    }

    pub fn aggregator(&self) -> ProgressionAggregator {
        ProgressionAggregator::new(self.db.clone())
    }

    pub fn completion(&self) -> CompletionTracker {
        CompletionTracker::new(self.db.clone(), self.catalog.clone())
    }

    pub fn streaks(&self) -> StreakTracker {
        StreakTracker::new(self.db.clone())
    }

    pub fn badges(&self) -> BadgeEngine {
        BadgeEngine::new(self.db.clone())
    }

    pub fn certificates(&self) -> CertificateIssuer {
        CertificateIssuer::new(self.db.clone())
    }

    // Facade operations

    /// Mark a lesson started
    pub fn start_lesson(&self, user_id: &str, lesson_id: &str) -> Result<LessonProgress> {
        self.completion().start(user_id, lesson_id)
    }

    /// Complete a lesson as of today (UTC)
    ///
    /// Callers that know the user's timezone should use
    /// [`complete_lesson_on`](Self::complete_lesson_on) with
    /// [`local_date`].
    pub fn complete_lesson(&self, user_id: &str, lesson_id: &str) -> Result<CompletionOutcome> {
        self.completion().complete(user_id, lesson_id, today_utc())
    }

    /// Complete a lesson as of a specific calendar day
    pub fn complete_lesson_on(
        &self,
        user_id: &str,
        lesson_id: &str,
        activity_date: NaiveDate,
    ) -> Result<CompletionOutcome> {
        self.completion().complete(user_id, lesson_id, activity_date)
    }

    /// Record a daily login or other activity for streak purposes
    ///
    /// Streak badges are evaluated right away, so a 7-day streak earned by
    /// logging in does not wait for the next lesson completion.
    pub fn record_daily_activity(&self, user_id: &str, date: NaiveDate) -> Result<StreakState> {
        let streak = self.streaks().record_activity(user_id, date)?;
        self.evaluate_badges(user_id)?;
        Ok(streak)
    }

    /// Manually award XP (admin adjustments, promotions, compensations)
    ///
    /// `idempotency_key` must be unique per logical cause so retries are
    /// absorbed.
    pub fn award_xp(
        &self,
        user_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<AwardResult> {
        let result = self.aggregator().apply_award(NewXpEvent {
            user_id: user_id.to_string(),
            amount,
            reason: XpReason::ManualAward,
            lesson_id: None,
            course_id: None,
            idempotency_key: idempotency_key.to_string(),
        })?;
        if result.leveled_up {
            // Level-threshold badges unlock with the award, not lazily
            self.evaluate_badges(user_id)?;
        }
        Ok(result)
    }

    fn evaluate_badges(&self, user_id: &str) -> Result<Vec<BadgeId>> {
        let badges = self.badges();
        let stats = badges.stats_for_user(user_id)?;
        badges.evaluate(user_id, &stats)
    }

    /// Everything a profile page needs in one read
    pub fn snapshot(&self, user_id: &str) -> Result<ProgressionSnapshot> {
        let state = self.aggregator().state(user_id)?;
        let streak = self.streaks().get(user_id)?;
        let badges = self.badges().grants_for_user(user_id)?;
        let certificates = self.certificates().for_user(user_id)?;

        let level = Level::for_xp(state.total_xp);
        let xp_to_next =
            Level::xp_for_next(level.level).map(|required| (required - state.total_xp).max(0));

        Ok(ProgressionSnapshot {
            user_id: user_id.to_string(),
            total_xp: state.total_xp,
            level: level.level,
            title: level.title.to_string(),
            xp_to_next_level: xp_to_next,
            streak,
            badges,
            certificates,
        })
    }

    /// Recent ledger entries for a user's activity feed
    pub fn recent_events(&self, user_id: &str, limit: u32) -> Result<Vec<XpEvent>> {
        self.ledger().recent_for_user(user_id, limit)
    }

    /// Rollup for one course
    pub fn course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress> {
        self.completion().course_progress(user_id, course_id)
    }

    /// Look a certificate up by its shareable code
    pub fn verify_certificate(&self, code: &str) -> Result<Option<Certificate>> {
        self.certificates().verify(code)
    }

    /// Repair cache drift for one user; true when something was fixed
    pub fn reconcile(&self, user_id: &str) -> Result<bool> {
        self.aggregator().reconcile(user_id)
    }

    /// Repair cache drift for every known user; returns the repair count
    pub fn reconcile_all(&self) -> Result<usize> {
        self.aggregator().reconcile_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LessonInfo, StaticCatalog};

    fn manager() -> ProgressManager {
        let catalog = StaticCatalog::new([
            LessonInfo {
                lesson_id: "intro".into(),
                course_id: "rust-101".into(),
                xp_reward: 50,
                order_index: 1,
            },
            LessonInfo {
                lesson_id: "ownership".into(),
                course_id: "rust-101".into(),
                xp_reward: 60,
                order_index: 2,
            },
        ]);
        ProgressManager::open_in_memory(Arc::new(catalog)).unwrap()
    }

    #[test]
    fn test_full_roundtrip() {
        let progress = manager();
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

        let outcome = progress.complete_lesson_on("ada", "intro", day).unwrap();
        assert_eq!(outcome.xp_earned, 50);
        assert!(!outcome.already_completed);

        let outcome = progress.complete_lesson_on("ada", "ownership", day).unwrap();
        assert!(outcome.course_progress.is_complete);
        assert!(outcome.certificate.is_some());

        let snapshot = progress.snapshot("ada").unwrap();
        // 50 + 60 lesson XP + one daily-activity bonus (same UTC day)
        assert_eq!(snapshot.total_xp, 115);
        assert_eq!(snapshot.level, 2);
        assert_eq!(snapshot.certificates.len(), 1);
        assert!(
            snapshot
                .badges
                .iter()
                .any(|b| b.badge_id == "first_course")
        );

        let verified = progress
            .verify_certificate(&snapshot.certificates[0].code)
            .unwrap()
            .unwrap();
        assert_eq!(verified.user_id, "ada");

        // The ledger always reconciles to the cache
        assert_eq!(
            progress.ledger().sum_for_user("ada").unwrap(),
            snapshot.total_xp
        );
        assert!(!progress.reconcile("ada").unwrap());
    }

    #[test]
    fn test_manual_award_is_idempotent() {
        let progress = manager();
        progress.award_xp("ada", 200, "promo:spring").unwrap();
        let repeat = progress.award_xp("ada", 200, "promo:spring").unwrap();
        assert!(repeat.duplicate);
        assert_eq!(progress.snapshot("ada").unwrap().total_xp, 200);
    }
}

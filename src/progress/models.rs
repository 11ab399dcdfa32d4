//! Data models for the progression core
//!
//! These structures represent rows in the progression database and the
//! results returned to callers of the public API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Why an XP event was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpReason {
    LessonCompleted,
    LevelUp,
    ManualAward,
    DailyActivity,
}

impl XpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LessonCompleted => "lesson_completed",
            Self::LevelUp => "level_up",
            Self::ManualAward => "manual_award",
            Self::DailyActivity => "daily_activity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lesson_completed" => Some(Self::LessonCompleted),
            "level_up" => Some(Self::LevelUp),
            "manual_award" => Some(Self::ManualAward),
            "daily_activity" => Some(Self::DailyActivity),
            _ => None,
        }
    }
}

/// An immutable row in the XP ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpEvent {
    pub id: String,
    pub user_id: String,
    /// May be zero for milestone markers, or negative for compensating awards
    pub amount: i64,
    pub reason: XpReason,
    pub lesson_id: Option<String>,
    pub course_id: Option<String>,
    pub idempotency_key: String,
    /// Unix millis
    pub created_at: i64,
}

/// An event about to be appended to the ledger
#[derive(Debug, Clone)]
pub struct NewXpEvent {
    pub user_id: String,
    pub amount: i64,
    pub reason: XpReason,
    pub lesson_id: Option<String>,
    pub course_id: Option<String>,
    pub idempotency_key: String,
}

/// Result of a ledger append
///
/// `Duplicate` carries the previously recorded event so callers can treat a
/// retried append as success.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended(XpEvent),
    Duplicate(XpEvent),
}

impl AppendOutcome {
    pub fn event(&self) -> &XpEvent {
        match self {
            Self::Appended(e) | Self::Duplicate(e) => e,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Derived XP/level cache for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionState {
    pub user_id: String,
    pub total_xp: i64,
    pub level: u32,
    pub updated_at: i64,
}

impl ProgressionState {
    /// Fresh state for a user with no ledger entries
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_xp: 0,
            level: 1,
            updated_at: 0,
        }
    }
}

/// Lesson completion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Per-(user, lesson) progress row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonProgress {
    pub user_id: String,
    pub lesson_id: String,
    pub course_id: String,
    pub status: LessonStatus,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Derived per-(user, course) rollup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseProgress {
    pub course_id: String,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub percentage: f32,
    pub is_complete: bool,
}

impl CourseProgress {
    pub fn new(course_id: &str, completed_lessons: u32, total_lessons: u32) -> Self {
        let percentage = if total_lessons == 0 {
            0.0
        } else {
            (completed_lessons as f32 / total_lessons as f32) * 100.0
        };
        Self {
            course_id: course_id.to_string(),
            completed_lessons,
            total_lessons,
            percentage,
            is_complete: total_lessons > 0 && completed_lessons == total_lessons,
        }
    }
}

/// Streak data for one user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreakState {
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Calendar date "YYYY-MM-DD" of the last counted activity
    pub last_activity_date: Option<String>,
}

impl StreakState {
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.last_activity_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }
}

/// A badge earned by a user; write-once per (user, badge)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeGrant {
    pub user_id: String,
    pub badge_id: String,
    pub earned_at: i64,
}

/// Result of a badge grant attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyGranted,
}

/// A course-completion certificate; exactly one per (user, course)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub user_id: String,
    pub course_id: String,
    /// Globally unique, human-shareable code
    pub code: String,
    pub issued_at: i64,
}

/// Aggregates badge predicates evaluate against
///
/// Built from already-derived state only; the rule engine never recomputes
/// raw stats itself.
#[derive(Debug, Clone, Default)]
pub struct UserStats {
    pub total_xp: i64,
    pub level: u32,
    pub lessons_completed: u32,
    pub courses_completed: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
}

/// Result of applying an XP award through the aggregator
#[derive(Debug, Clone)]
pub struct AwardResult {
    pub new_total_xp: i64,
    pub old_level: u32,
    pub new_level: u32,
    pub leveled_up: bool,
    /// Zero when the award was a duplicate of an earlier one
    pub xp_earned: i64,
    pub duplicate: bool,
}

/// Result of a `complete_lesson` call
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub xp_earned: i64,
    pub new_total_xp: i64,
    pub new_level: u32,
    pub leveled_up: bool,
    /// True when this lesson had already been completed; nothing was granted
    pub already_completed: bool,
    pub course_progress: CourseProgress,
    pub streak: StreakState,
    /// Badge ids newly earned by this completion
    pub new_badges: Vec<String>,
    /// Set only when this completion finished the course for the first time
    pub certificate: Option<Certificate>,
}

/// Everything a profile page needs in one read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionSnapshot {
    pub user_id: String,
    pub total_xp: i64,
    pub level: u32,
    pub title: String,
    /// XP still needed for the next level; `None` at max level
    pub xp_to_next_level: Option<i64>,
    pub streak: StreakState,
    pub badges: Vec<BadgeGrant>,
    pub certificates: Vec<Certificate>,
}

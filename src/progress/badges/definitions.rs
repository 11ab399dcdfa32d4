//! Badge definitions and metadata
//!
//! Badges are declarative predicates over already-derived aggregates
//! ([`UserStats`]); the catalog here is the only place unlock conditions
//! live.

use super::super::models::UserStats;

/// Unique identifier for each badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadgeId {
    // Lesson milestones
    FirstLesson,
    TenLessons,
    FiftyLessons,
    HundredLessons,

    // Course completion
    FirstCourse,
    ThreeCourses,
    TenCourses,

    // Level thresholds
    Level5,
    Level10,
    Level20,

    // Streaks
    Streak3,
    Streak7,
    Streak30,
    Streak100,
}

impl BadgeId {
    /// Get the string ID for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstLesson => "first_lesson",
            Self::TenLessons => "ten_lessons",
            Self::FiftyLessons => "fifty_lessons",
            Self::HundredLessons => "hundred_lessons",
            Self::FirstCourse => "first_course",
            Self::ThreeCourses => "three_courses",
            Self::TenCourses => "ten_courses",
            Self::Level5 => "level_5",
            Self::Level10 => "level_10",
            Self::Level20 => "level_20",
            Self::Streak3 => "streak_3",
            Self::Streak7 => "streak_7",
            Self::Streak30 => "streak_30",
            Self::Streak100 => "streak_100",
        }
    }

    /// Parse from database string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first_lesson" => Some(Self::FirstLesson),
            "ten_lessons" => Some(Self::TenLessons),
            "fifty_lessons" => Some(Self::FiftyLessons),
            "hundred_lessons" => Some(Self::HundredLessons),
            "first_course" => Some(Self::FirstCourse),
            "three_courses" => Some(Self::ThreeCourses),
            "ten_courses" => Some(Self::TenCourses),
            "level_5" => Some(Self::Level5),
            "level_10" => Some(Self::Level10),
            "level_20" => Some(Self::Level20),
            "streak_3" => Some(Self::Streak3),
            "streak_7" => Some(Self::Streak7),
            "streak_30" => Some(Self::Streak30),
            "streak_100" => Some(Self::Streak100),
            _ => None,
        }
    }
}

/// Badge category for grouping in UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeCategory {
    Milestone,
    Course,
    Level,
    Streak,
}

impl BadgeCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Milestone => "Milestones",
            Self::Course => "Courses",
            Self::Level => "Levels",
            Self::Streak => "Streaks",
        }
    }
}

/// Badge definition with metadata and unlock predicate
pub struct Badge {
    pub id: BadgeId,
    pub name: &'static str,
    pub description: &'static str,
    pub category: BadgeCategory,
    pub predicate: fn(&UserStats) -> bool,
}

/// All badge definitions
pub static BADGES: &[Badge] = &[
    // === LESSON MILESTONES ===
    Badge {
        id: BadgeId::FirstLesson,
        name: "First Steps",
        description: "Complete your first lesson",
        category: BadgeCategory::Milestone,
        predicate: |s| s.lessons_completed >= 1,
    },
    Badge {
        id: BadgeId::TenLessons,
        name: "Getting Serious",
        description: "Complete 10 lessons",
        category: BadgeCategory::Milestone,
        predicate: |s| s.lessons_completed >= 10,
    },
    Badge {
        id: BadgeId::FiftyLessons,
        name: "Dedicated",
        description: "Complete 50 lessons",
        category: BadgeCategory::Milestone,
        predicate: |s| s.lessons_completed >= 50,
    },
    Badge {
        id: BadgeId::HundredLessons,
        name: "Century",
        description: "Complete 100 lessons",
        category: BadgeCategory::Milestone,
        predicate: |s| s.lessons_completed >= 100,
    },
    // === COURSES ===
    Badge {
        id: BadgeId::FirstCourse,
        name: "Graduate",
        description: "Finish your first course",
        category: BadgeCategory::Course,
        predicate: |s| s.courses_completed >= 1,
    },
    Badge {
        id: BadgeId::ThreeCourses,
        name: "Well Rounded",
        description: "Finish 3 courses",
        category: BadgeCategory::Course,
        predicate: |s| s.courses_completed >= 3,
    },
    Badge {
        id: BadgeId::TenCourses,
        name: "Polymath",
        description: "Finish 10 courses",
        category: BadgeCategory::Course,
        predicate: |s| s.courses_completed >= 10,
    },
    // === LEVELS ===
    Badge {
        id: BadgeId::Level5,
        name: "Scholar",
        description: "Reach level 5",
        category: BadgeCategory::Level,
        predicate: |s| s.level >= 5,
    },
    Badge {
        id: BadgeId::Level10,
        name: "Expert",
        description: "Reach level 10",
        category: BadgeCategory::Level,
        predicate: |s| s.level >= 10,
    },
    Badge {
        id: BadgeId::Level20,
        name: "Luminary",
        description: "Reach level 20",
        category: BadgeCategory::Level,
        predicate: |s| s.level >= 20,
    },
    // === STREAKS ===
    Badge {
        id: BadgeId::Streak3,
        name: "On Fire",
        description: "Keep a 3-day streak",
        category: BadgeCategory::Streak,
        predicate: |s| s.current_streak >= 3,
    },
    Badge {
        id: BadgeId::Streak7,
        name: "Week Warrior",
        description: "Keep a 7-day streak",
        category: BadgeCategory::Streak,
        predicate: |s| s.current_streak >= 7,
    },
    Badge {
        id: BadgeId::Streak30,
        name: "Monthly Master",
        description: "Keep a 30-day streak",
        category: BadgeCategory::Streak,
        predicate: |s| s.current_streak >= 30,
    },
    Badge {
        id: BadgeId::Streak100,
        name: "Unstoppable",
        description: "Keep a 100-day streak",
        category: BadgeCategory::Streak,
        predicate: |s| s.current_streak >= 100,
    },
];

impl Badge {
    /// Get badge definition by ID
    pub fn get(id: BadgeId) -> &'static Badge {
        BADGES
            .iter()
            .find(|b| b.id == id)
            .expect("All badges should be defined")
    }

    /// Get total number of badges
    pub fn total_count() -> usize {
        BADGES.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_badge_round_trips_its_id() {
        for badge in BADGES {
            assert_eq!(BadgeId::parse(badge.id.as_str()), Some(badge.id));
        }
    }

    #[test]
    fn test_predicates_false_on_empty_stats() {
        let stats = UserStats::default();
        for badge in BADGES {
            assert!(
                !(badge.predicate)(&stats),
                "badge {} unlocked with no activity",
                badge.id.as_str()
            );
        }
    }
}

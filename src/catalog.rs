//! Read-only content catalog interface
//!
//! Courses and lessons are authored elsewhere; the progression core only
//! needs each lesson's owning course, XP reward and position. The platform
//! backs this trait with its catalog service; [`StaticCatalog`] serves tests
//! and embedded content.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lesson metadata consumed from the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonInfo {
    pub lesson_id: String,
    pub course_id: String,
    pub xp_reward: i64,
    pub order_index: u32,
}

pub trait ContentCatalog: Send + Sync {
    /// Look up one lesson by id
    fn lesson(&self, lesson_id: &str) -> Option<LessonInfo>;

    /// All lessons of a course, ordered by `order_index`
    fn lessons_for_course(&self, course_id: &str) -> Vec<LessonInfo>;
}

/// In-memory catalog
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    lessons: HashMap<String, LessonInfo>,
}

impl StaticCatalog {
    pub fn new(lessons: impl IntoIterator<Item = LessonInfo>) -> Self {
        Self {
            lessons: lessons
                .into_iter()
                .map(|l| (l.lesson_id.clone(), l))
                .collect(),
        }
    }

    pub fn add_lesson(&mut self, lesson: LessonInfo) {
        self.lessons.insert(lesson.lesson_id.clone(), lesson);
    }
}

impl ContentCatalog for StaticCatalog {
    fn lesson(&self, lesson_id: &str) -> Option<LessonInfo> {
        self.lessons.get(lesson_id).cloned()
    }

    fn lessons_for_course(&self, course_id: &str) -> Vec<LessonInfo> {
        let mut lessons: Vec<LessonInfo> = self
            .lessons
            .values()
            .filter(|l| l.course_id == course_id)
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.order_index);
        lessons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(id: &str, course: &str, order: u32) -> LessonInfo {
        LessonInfo {
            lesson_id: id.to_string(),
            course_id: course.to_string(),
            xp_reward: 50,
            order_index: order,
        }
    }

    #[test]
    fn test_lessons_for_course_ordered() {
        let catalog = StaticCatalog::new([
            lesson("l3", "c1", 3),
            lesson("l1", "c1", 1),
            lesson("l2", "c1", 2),
            lesson("other", "c2", 1),
        ]);

        let lessons = catalog.lessons_for_course("c1");
        let ids: Vec<&str> = lessons.iter().map(|l| l.lesson_id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "l2", "l3"]);
        assert!(catalog.lesson("missing").is_none());
    }
}

//! Lesson lookup by keyword.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use teachprompt_core::LessonId;

use crate::subjects::Subject;

#[derive(Debug, Error)]
pub enum LessonIndexError {
    #[error("lesson index unavailable: {0}")]
    Unavailable(String),

    #[error("lesson index query failed: {0}")]
    Query(String),
}

/// One search hit. Higher `relevance` is better; values are in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonMatch {
    pub lesson_id: LessonId,
    pub title: String,
    pub relevance: f64,
}

#[async_trait]
pub trait LessonIndex: Send + Sync {
    /// Lessons matching `keyword`, optionally narrowed by subject and grade.
    async fn search_by_keyword(
        &self,
        keyword: &str,
        subject: Option<Subject>,
        grade: Option<u8>,
    ) -> Result<Vec<LessonMatch>, LessonIndexError>;
}

/// One catalogue lesson. Deserializes from catalogue files; a missing
/// `lesson_id` gets a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonEntry {
    #[serde(default = "LessonId::new")]
    pub lesson_id: LessonId,
    pub subject: Subject,
    pub grade: u8,
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl LessonEntry {
    pub fn new(subject: Subject, grade: u8, title: impl Into<String>, keywords: &[&str]) -> Self {
        Self {
            lesson_id: LessonId::new(),
            subject,
            grade,
            title: title.into(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Lowercased, trimmed keywords; blanks dropped.
    pub fn normalized(mut self) -> Self {
        self.keywords = self
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    fn relevance(&self, keyword: &str) -> Option<f64> {
        if self.title.to_lowercase().contains(keyword) {
            Some(1.0)
        } else if self.keywords.iter().any(|k| k == keyword) {
            Some(0.8)
        } else if self.keywords.iter().any(|k| k.contains(keyword)) {
            Some(0.5)
        } else {
            None
        }
    }
}

/// In-memory lesson catalogue for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryLessonIndex {
    lessons: RwLock<Vec<LessonEntry>>,
}

impl InMemoryLessonIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lessons(lessons: Vec<LessonEntry>) -> Self {
        Self {
            lessons: RwLock::new(lessons),
        }
    }

    pub fn insert(&self, entry: LessonEntry) -> Result<LessonId, LessonIndexError> {
        let id = entry.lesson_id;
        self.lessons
            .write()
            .map_err(|_| LessonIndexError::Unavailable("lock poisoned".to_string()))?
            .push(entry);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.lessons.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LessonIndex for InMemoryLessonIndex {
    async fn search_by_keyword(
        &self,
        keyword: &str,
        subject: Option<Subject>,
        grade: Option<u8>,
    ) -> Result<Vec<LessonMatch>, LessonIndexError> {
        let keyword = keyword.to_lowercase();
        let lessons = self
            .lessons
            .read()
            .map_err(|_| LessonIndexError::Unavailable("lock poisoned".to_string()))?;

        let mut hits: Vec<LessonMatch> = lessons
            .iter()
            .filter(|l| subject.is_none_or(|s| l.subject == s))
            .filter(|l| grade.is_none_or(|g| l.grade == g))
            .filter_map(|l| {
                l.relevance(&keyword).map(|relevance| LessonMatch {
                    lesson_id: l.lesson_id,
                    title: l.title.clone(),
                    relevance,
                })
            })
            .collect();

        // Stable: equal relevance keeps catalogue order.
        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        Ok(hits)
    }
}

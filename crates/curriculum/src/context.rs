use serde::{Deserialize, Serialize};

use teachprompt_core::LessonId;

use crate::subjects::Subject;

/// Lesson the prompt most likely refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonSuggestion {
    pub lesson_id: LessonId,
    pub title: Option<String>,
    /// Index-provided relevance, or 1.0 for an explicitly chosen lesson.
    pub confidence: f64,
    pub reason: String,
}

/// Curriculum metadata inferred from one prompt. Derived per request, never stored alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurriculumContext {
    pub subject: Option<Subject>,
    pub grade_level: Option<u8>,
    pub semester: Option<u8>,
    pub keywords: Vec<String>,
    pub lesson: Option<LessonSuggestion>,
}

impl CurriculumContext {
    /// Number of populated signals (subject, grade, semester, lesson).
    pub fn signal_count(&self) -> usize {
        [
            self.subject.is_some(),
            self.grade_level.is_some(),
            self.semester.is_some(),
            self.lesson.is_some(),
        ]
        .into_iter()
        .filter(|b| *b)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.signal_count() == 0 && self.keywords.is_empty()
    }

    /// One-line summary for prompts sent to the provider.
    pub fn describe(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(s) = self.subject {
            parts.push(format!("subject: {}", s.display_name()));
        }
        if let Some(g) = self.grade_level {
            parts.push(format!("grade: {g}"));
        }
        if let Some(s) = self.semester {
            parts.push(format!("semester: {s}"));
        }
        if let Some(title) = self.lesson.as_ref().and_then(|l| l.title.as_deref()) {
            parts.push(format!("lesson: {title}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_has_no_description() {
        let ctx = CurriculumContext::default();
        assert!(ctx.is_empty());
        assert_eq!(ctx.describe(), None);
    }

    #[test]
    fn describe_lists_known_fields() {
        let ctx = CurriculumContext {
            subject: Some(Subject::Physics),
            grade_level: Some(11),
            ..Default::default()
        };
        assert_eq!(ctx.signal_count(), 2);
        assert_eq!(ctx.describe().unwrap(), "subject: Vật lý, grade: 11");
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use teachprompt_core::LessonId;

use crate::context::{CurriculumContext, LessonSuggestion};
use crate::keywords::extract_keywords;
use crate::lesson_index::LessonIndex;
use crate::markers::{detect_grade, detect_semester};
use crate::subjects::detect_subject;

/// Reason names at most this many matched keywords.
const REASON_KEYWORDS: usize = 3;

struct Candidate {
    title: String,
    relevance: f64,
    matched: Vec<String>,
    first_seen: usize,
}

/// Resolves curriculum context for a prompt. Never fails: index errors are
/// logged and leave the lesson suggestion empty.
#[derive(Clone, Default)]
pub struct CurriculumResolver {
    index: Option<Arc<dyn LessonIndex>>,
}

impl std::fmt::Debug for CurriculumResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurriculumResolver")
            .field("has_index", &self.index.is_some())
            .finish()
    }
}

impl CurriculumResolver {
    /// Resolver without lesson lookup.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: Arc<dyn LessonIndex>) -> Self {
        Self { index: Some(index) }
    }

    /// Text-only signals: subject, grade, semester and keywords.
    pub fn detect(&self, text: &str) -> CurriculumContext {
        CurriculumContext {
            subject: detect_subject(text),
            grade_level: detect_grade(text),
            semester: detect_semester(text),
            keywords: extract_keywords(text),
            lesson: None,
        }
    }

    /// Full resolution. An explicit lesson always wins over index lookup.
    pub async fn resolve(&self, text: &str, explicit_lesson: Option<LessonId>) -> CurriculumContext {
        let mut ctx = self.detect(text);

        ctx.lesson = match explicit_lesson {
            Some(lesson_id) => Some(LessonSuggestion {
                lesson_id,
                title: None,
                confidence: 1.0,
                reason: "lesson selected by requester".to_string(),
            }),
            None => self.suggest_lesson(&ctx).await,
        };

        debug!(
            subject = ?ctx.subject,
            grade = ?ctx.grade_level,
            semester = ?ctx.semester,
            keywords = ctx.keywords.len(),
            lesson = ctx.lesson.is_some(),
            "curriculum context resolved"
        );
        ctx
    }

    async fn suggest_lesson(&self, ctx: &CurriculumContext) -> Option<LessonSuggestion> {
        let index = self.index.as_ref()?;
        if ctx.keywords.is_empty() {
            return None;
        }

        let mut candidates: HashMap<LessonId, Candidate> = HashMap::new();
        let mut order = 0usize;

        for keyword in &ctx.keywords {
            let hits = match index
                .search_by_keyword(keyword, ctx.subject, ctx.grade_level)
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, keyword = %keyword, "lesson index lookup failed");
                    return None;
                }
            };

            for hit in hits {
                let entry = candidates.entry(hit.lesson_id).or_insert_with(|| {
                    order += 1;
                    Candidate {
                        title: hit.title.clone(),
                        relevance: hit.relevance,
                        matched: Vec::new(),
                        first_seen: order,
                    }
                });
                entry.relevance = entry.relevance.max(hit.relevance);
                if !entry.matched.contains(keyword) {
                    entry.matched.push(keyword.clone());
                }
            }
        }

        let (lesson_id, best) = candidates.into_iter().max_by(|(_, a), (_, b)| {
            a.relevance
                .total_cmp(&b.relevance)
                .then(a.matched.len().cmp(&b.matched.len()))
                .then(b.first_seen.cmp(&a.first_seen))
        })?;

        let named: Vec<&str> = best
            .matched
            .iter()
            .take(REASON_KEYWORDS)
            .map(String::as_str)
            .collect();

        Some(LessonSuggestion {
            lesson_id,
            title: Some(best.title),
            confidence: best.relevance.clamp(0.0, 1.0),
            reason: format!("matched keywords: {}", named.join(", ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::lesson_index::{InMemoryLessonIndex, LessonEntry, LessonIndexError, LessonMatch};
    use crate::subjects::Subject;

    struct BrokenIndex;

    #[async_trait]
    impl LessonIndex for BrokenIndex {
        async fn search_by_keyword(
            &self,
            _keyword: &str,
            _subject: Option<Subject>,
            _grade: Option<u8>,
        ) -> Result<Vec<LessonMatch>, LessonIndexError> {
            Err(LessonIndexError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn prompt_without_markers_yields_empty_context() {
        let resolver = CurriculumResolver::with_index(Arc::new(InMemoryLessonIndex::new()));
        let ctx = resolver.resolve("Hãy viết giúp tôi một đoạn", None).await;

        assert_eq!(ctx.subject, None);
        assert_eq!(ctx.grade_level, None);
        assert_eq!(ctx.semester, None);
        assert!(ctx.lesson.is_none());
    }

    #[tokio::test]
    async fn detects_all_text_signals() {
        let ctx = CurriculumResolver::new()
            .resolve("Soạn đề ôn tập Vật lý lớp 11 học kỳ 2 về dao động điều hòa", None)
            .await;

        assert_eq!(ctx.subject, Some(Subject::Physics));
        assert_eq!(ctx.grade_level, Some(11));
        assert_eq!(ctx.semester, Some(2));
        assert!(ctx.keywords.contains(&"dao".to_string()));
        assert!(ctx.lesson.is_none());
    }

    #[tokio::test]
    async fn explicit_lesson_has_full_confidence() {
        let lesson = LessonId::new();
        let ctx = CurriculumResolver::new()
            .resolve("anything at all", Some(lesson))
            .await;

        let suggestion = ctx.lesson.unwrap();
        assert_eq!(suggestion.lesson_id, lesson);
        assert_eq!(suggestion.confidence, 1.0);
    }

    fn physics_index() -> (InMemoryLessonIndex, LessonId) {
        let newton = LessonEntry::new(
            Subject::Physics,
            10,
            "Ba định luật",
            &["newton", "quán tính", "gia tốc"],
        );
        let other = LessonEntry::new(Subject::Physics, 10, "Chuyển động", &["gia tốc"]);
        let newton_id = newton.lesson_id;
        (InMemoryLessonIndex::with_lessons(vec![other, newton]), newton_id)
    }

    #[tokio::test]
    async fn highest_relevance_lesson_wins() {
        let (index, newton_id) = physics_index();
        let ctx = CurriculumResolver::with_index(Arc::new(index))
            .resolve("Vật lý lớp 10: gia tốc và newton", None)
            .await;

        let suggestion = ctx.lesson.unwrap();
        assert_eq!(suggestion.lesson_id, newton_id);
        assert_eq!(suggestion.confidence, 0.8);
        assert!(suggestion.reason.contains("newton"));
    }

    #[tokio::test]
    async fn relevance_tie_goes_to_more_matched_keywords() {
        let (index, newton_id) = physics_index();
        let ctx = CurriculumResolver::with_index(Arc::new(index))
            .resolve("Bài tập gia tốc và quán tính", None)
            .await;

        let suggestion = ctx.lesson.unwrap();
        assert_eq!(suggestion.lesson_id, newton_id);
        assert_eq!(suggestion.confidence, 0.5);
        assert_eq!(suggestion.reason, "matched keywords: gia, tốc, quán");
    }

    #[tokio::test]
    async fn index_failure_degrades_to_no_lesson() {
        let ctx = CurriculumResolver::with_index(Arc::new(BrokenIndex))
            .resolve("Hóa học lớp 12 về este", None)
            .await;

        assert_eq!(ctx.subject, Some(Subject::Chemistry));
        assert_eq!(ctx.grade_level, Some(12));
        assert!(ctx.lesson.is_none());
    }
}

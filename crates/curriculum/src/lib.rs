//! `teachprompt-curriculum`
//!
//! Best-effort extraction of curriculum metadata (subject, grade, semester,
//! keywords, lesson) from free-text teacher prompts. Nothing here returns an
//! error to the caller: missing signal just means emptier context.

pub mod context;
pub mod keywords;
pub mod lesson_index;
pub mod markers;
pub mod resolver;
pub mod subjects;

pub use context::{CurriculumContext, LessonSuggestion};
pub use keywords::extract_keywords;
pub use lesson_index::{InMemoryLessonIndex, LessonEntry, LessonIndex, LessonIndexError, LessonMatch};
pub use markers::{detect_grade, detect_semester};
pub use resolver::CurriculumResolver;
pub use subjects::{Subject, detect_subject};

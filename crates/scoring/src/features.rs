//! Text features the rule-based scorer works from.

use std::sync::LazyLock;

use regex::Regex;

static LENGTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d+\s*(?:từ|chữ|câu|đoạn|trang|phút|ý|words?|sentences?|paragraphs?|pages?|minutes?|items?|questions?|câu hỏi)\b",
    )
    .unwrap_or_else(|e| panic!("length pattern must compile: {e}"))
});

static STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*•])\s+").unwrap_or_else(|e| panic!("step pattern must compile: {e}"))
});

const ACTION_MARKERS: &[&str] = &[
    "hãy", "soạn", "viết", "tạo", "thiết kế", "liệt kê", "giải thích", "phân tích", "tóm tắt",
    "so sánh", "đánh giá", "xây dựng", "create", "write", "design", "explain", "list",
    "summarize", "analyze", "compare", "generate", "draft", "prepare",
];

const ROLE_MARKERS: &[&str] = &["bạn là", "đóng vai", "với vai trò", "you are", "act as", "as a teacher"];

const AUDIENCE_MARKERS: &[&str] = &[
    "học sinh", "học viên", "lớp học", "students", "learners", "pupils", "audience",
];

const FORMAT_MARKERS: &[&str] = &[
    "bảng", "danh sách", "gạch đầu dòng", "định dạng", "dạng", "trắc nghiệm", "markdown",
    "table", "json", "list", "bullet", "format", "outline", "multiple choice",
];

const CONSTRAINT_MARKERS: &[&str] = &[
    "không được", "không", "phải", "chỉ", "tránh", "tối đa", "tối thiểu", "ít nhất", "đúng",
    "must", "only", "avoid", "do not", "don't", "at most", "at least", "exactly", "no more than",
];

const EXAMPLE_MARKERS: &[&str] = &["ví dụ", "chẳng hạn", "example", "e.g.", "for instance", "mẫu"];

const OBJECTIVE_MARKERS: &[&str] = &[
    "mục tiêu", "yêu cầu cần đạt", "năng lực", "objective", "learning outcome", "goal",
];

const PEDAGOGY_MARKERS: &[&str] = &[
    "hoạt động", "thảo luận", "nhóm", "đánh giá", "câu hỏi gợi mở", "phân hóa", "khởi động",
    "củng cố", "vận dụng", "activity", "discussion", "group work", "assessment", "scaffold",
    "differentiat", "bloom", "warm-up", "reflection",
];

fn count_markers(lowered: &str, markers: &[&str]) -> usize {
    markers.iter().filter(|m| lowered.contains(*m)).count()
}

/// Shallow lexical features of a prompt. Marker fields count distinct markers found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptFeatures {
    pub word_count: usize,
    pub sentence_count: usize,
    pub structured_steps: usize,
    pub action_markers: usize,
    pub role_markers: usize,
    pub audience_markers: usize,
    pub format_markers: usize,
    pub constraint_markers: usize,
    pub example_markers: usize,
    pub objective_markers: usize,
    pub pedagogy_markers: usize,
    pub has_length_limit: bool,
}

impl PromptFeatures {
    pub fn extract(text: &str) -> Self {
        let lowered = text.to_lowercase();

        let sentence_count = text
            .split(['.', '!', '?', '\n'])
            .filter(|s| s.split_whitespace().count() >= 2)
            .count();

        Self {
            word_count: text.split_whitespace().count(),
            sentence_count,
            structured_steps: STEP_RE.find_iter(text).count(),
            action_markers: count_markers(&lowered, ACTION_MARKERS),
            role_markers: count_markers(&lowered, ROLE_MARKERS),
            audience_markers: count_markers(&lowered, AUDIENCE_MARKERS),
            format_markers: count_markers(&lowered, FORMAT_MARKERS),
            constraint_markers: count_markers(&lowered, CONSTRAINT_MARKERS),
            example_markers: count_markers(&lowered, EXAMPLE_MARKERS),
            objective_markers: count_markers(&lowered, OBJECTIVE_MARKERS),
            pedagogy_markers: count_markers(&lowered, PEDAGOGY_MARKERS),
            has_length_limit: LENGTH_RE.is_match(text),
        }
    }
}

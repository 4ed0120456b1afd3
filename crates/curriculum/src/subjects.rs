//! Subject detection by synonym matching.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Math,
    Literature,
    English,
    Physics,
    Chemistry,
    Biology,
    History,
    Geography,
    Informatics,
    Civics,
}

impl Subject {
    pub fn display_name(&self) -> &'static str {
        match self {
            Subject::Math => "Toán",
            Subject::Literature => "Ngữ văn",
            Subject::English => "Tiếng Anh",
            Subject::Physics => "Vật lý",
            Subject::Chemistry => "Hóa học",
            Subject::Biology => "Sinh học",
            Subject::History => "Lịch sử",
            Subject::Geography => "Địa lý",
            Subject::Informatics => "Tin học",
            Subject::Civics => "Giáo dục công dân",
        }
    }
}

/// Declaration order is the tie-break order: the earlier subject wins.
const SUBJECT_SYNONYMS: &[(Subject, &[&str])] = &[
    (
        Subject::Math,
        &[
            "toán học", "môn toán", "toán", "đại số", "hình học", "giải tích", "lượng giác",
            "mathematics", "math", "algebra", "geometry", "calculus",
        ],
    ),
    (
        Subject::Literature,
        &[
            "ngữ văn", "văn học", "môn văn", "tác phẩm", "bài thơ", "truyện ngắn", "nghị luận",
            "literature", "poem", "novel",
        ],
    ),
    (
        Subject::English,
        &["tiếng anh", "english", "grammar", "vocabulary", "ielts", "toeic"],
    ),
    (
        Subject::Physics,
        &[
            "vật lý", "vật lí", "physics", "động lực học", "điện trường", "quang học", "dao động",
            "newton",
        ],
    ),
    (
        Subject::Chemistry,
        &[
            "hóa học", "hoá học", "chemistry", "phản ứng", "nguyên tố", "axit", "hợp chất",
        ],
    ),
    (
        Subject::Biology,
        &[
            "sinh học", "biology", "tế bào", "di truyền", "quang hợp", "adn", "tiến hóa",
        ],
    ),
    (
        Subject::History,
        &["lịch sử", "history", "chiến tranh", "cách mạng", "triều đại"],
    ),
    (
        Subject::Geography,
        &["địa lý", "địa lí", "geography", "khí hậu", "bản đồ", "dân số"],
    ),
    (
        Subject::Informatics,
        &[
            "tin học", "informatics", "lập trình", "programming", "thuật toán", "algorithm",
            "python",
        ],
    ),
    (
        Subject::Civics,
        &["giáo dục công dân", "gdcd", "civics", "pháp luật", "đạo đức"],
    ),
];

/// Per-subject match score: sum of the char lengths of every synonym found in `text`.
pub fn subject_scores(text: &str) -> Vec<(Subject, usize)> {
    let lowered = text.to_lowercase();
    SUBJECT_SYNONYMS
        .iter()
        .map(|(subject, synonyms)| {
            let score = synonyms
                .iter()
                .filter(|s| lowered.contains(*s))
                .map(|s| s.chars().count())
                .sum();
            (*subject, score)
        })
        .collect()
}

/// Highest-scoring subject, `None` when nothing matched.
pub fn detect_subject(text: &str) -> Option<Subject> {
    let mut best: Option<(Subject, usize)> = None;
    for (subject, score) in subject_scores(text) {
        if score == 0 {
            continue;
        }
        // Strictly greater: ties keep the earlier-declared subject.
        if best.is_none_or(|(_, b)| score > b) {
            best = Some((subject, score));
        }
    }
    best.map(|(s, _)| s)
}
